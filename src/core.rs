//! The data handle.
//!
//! An [`AstroData`] is a view over one dataset: a shared global header,
//! a list of science subunits, and a bag of global side payloads.
//! Slicing produces new handles that alias the global header and the
//! subunits themselves while owning their own subunit list, so metadata
//! edits made through a slice are visible everywhere but structural
//! edits to the parent never reach into an existing slice.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;

use crate::error::{Error, Result};
use crate::fits::{DataFile, ExtPayload, Extension};
use crate::header::{Header, Value};
use crate::nddata::{Extra, NdData, PixelArray, Wcs};
use crate::registry::ResolvedClass;
use crate::table::Table;
use crate::tags;

/// Names that can never be used for an attached payload; they collide
/// with the built-in planes.
pub const RESERVED_NAMES: [&str; 7] = ["DATA", "SCI", "VAR", "DQ", "MASK", "VARIANCE", "WCS"];

/// Header keywords that describe extension structure rather than
/// science metadata; these are regenerated on write.
const STRUCTURAL_KEYWORDS: [&str; 8] = [
    "XTENSION", "BITPIX", "NAXIS", "PCOUNT", "GCOUNT", "EXTNAME", "EXTVER", "SIMPLE",
];

pub(crate) fn is_structural(keyword: &str) -> bool {
    STRUCTURAL_KEYWORDS.contains(&keyword) || keyword.starts_with("NAXIS")
}

// ── Payloads ──

/// Something that can be appended to a top-level handle.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A bare pixel array.
    Array(PixelArray),
    /// A fully formed subunit.
    Unit(NdData),
    /// A side table.
    Table(Table),
    /// Another handle; must be a single view, absorbed as one subunit.
    Handle(AstroData),
}

impl From<PixelArray> for Payload {
    fn from(a: PixelArray) -> Self {
        Payload::Array(a)
    }
}

impl From<NdData> for Payload {
    fn from(nd: NdData) -> Self {
        Payload::Unit(nd)
    }
}

impl From<Table> for Payload {
    fn from(t: Table) -> Self {
        Payload::Table(t)
    }
}

impl From<AstroData> for Payload {
    fn from(h: AstroData) -> Self {
        Payload::Handle(h)
    }
}

// ── The handle ──

/// A view over one dataset. See the module documentation for the
/// aliasing rules.
#[derive(Debug, Clone)]
pub struct AstroData {
    class: Arc<ResolvedClass>,
    phu: Rc<RefCell<Header>>,
    units: Vec<Rc<RefCell<NdData>>>,
    globals: Rc<RefCell<IndexMap<String, Extra>>>,
    /// Original subunit positions; `Some` only on sliced views.
    indices: Option<Vec<usize>>,
    is_single: bool,
    tag_cache: RefCell<Option<BTreeSet<String>>>,
    path: Option<PathBuf>,
    orig_filename: Option<String>,
}

impl AstroData {
    /// Build a top-level handle from its parts.
    pub(crate) fn build(class: Arc<ResolvedClass>, phu: Header, units: Vec<NdData>) -> Self {
        AstroData {
            class,
            phu: Rc::new(RefCell::new(phu)),
            units: units
                .into_iter()
                .map(|u| Rc::new(RefCell::new(u)))
                .collect(),
            globals: Rc::new(RefCell::new(IndexMap::new())),
            indices: None,
            is_single: false,
            tag_cache: RefCell::new(None),
            path: None,
            orig_filename: None,
        }
    }

    pub(crate) fn set_global_payload(&mut self, name: String, payload: Extra) {
        self.globals.borrow_mut().insert(name, payload);
    }

    pub(crate) fn set_path_and_origin(&mut self, path: PathBuf, orig: Option<String>) {
        self.path = Some(path);
        self.orig_filename = orig;
    }

    // ── Structure ──

    /// Number of subunits in this view.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` if the view holds no subunits.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Returns `true` for a single-subunit view made with [`AstroData::index`].
    pub fn is_single(&self) -> bool {
        self.is_single
    }

    /// Returns `true` for any view narrowed from a parent handle.
    pub fn is_sliced(&self) -> bool {
        self.indices.is_some()
    }

    fn position_of(&self, i: usize) -> usize {
        match &self.indices {
            Some(ix) => ix[i],
            None => i,
        }
    }

    fn view_of(&self, i: usize, single: bool) -> AstroData {
        AstroData {
            class: Arc::clone(&self.class),
            phu: Rc::clone(&self.phu),
            units: vec![Rc::clone(&self.units[i])],
            globals: Rc::clone(&self.globals),
            indices: Some(vec![self.position_of(i)]),
            is_single: single,
            tag_cache: RefCell::new(self.tag_cache.borrow().clone()),
            path: self.path.clone(),
            orig_filename: self.orig_filename.clone(),
        }
    }

    /// A single-subunit view. The global header and the subunit itself
    /// stay shared with this handle.
    pub fn index(&self, i: usize) -> Result<AstroData> {
        if self.is_single {
            return Err(Error::InvalidOperation("cannot index a single view"));
        }
        if i >= self.units.len() {
            return Err(Error::KeyNotFound(i.to_string()));
        }
        Ok(self.view_of(i, true))
    }

    /// A narrowed multi-subunit view over `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<AstroData> {
        if self.is_single {
            return Err(Error::InvalidOperation("cannot slice a single view"));
        }
        if range.end > self.units.len() || range.start > range.end {
            return Err(Error::KeyNotFound(format!(
                "slice {}..{}",
                range.start, range.end
            )));
        }
        Ok(AstroData {
            class: Arc::clone(&self.class),
            phu: Rc::clone(&self.phu),
            units: range.clone().map(|i| Rc::clone(&self.units[i])).collect(),
            globals: Rc::clone(&self.globals),
            indices: Some(range.map(|i| self.position_of(i)).collect()),
            is_single: false,
            tag_cache: RefCell::new(self.tag_cache.borrow().clone()),
            path: self.path.clone(),
            orig_filename: self.orig_filename.clone(),
        })
    }

    /// Iterate over fresh single-subunit views.
    pub fn iter(&self) -> impl Iterator<Item = AstroData> + '_ {
        (0..self.units.len()).map(move |i| self.view_of(i, true))
    }

    /// 1-based subunit number of a single view, counted in the parent.
    pub fn id(&self) -> Result<usize> {
        if !self.is_single {
            return Err(Error::InvalidOperation("id() needs a single view"));
        }
        Ok(self.position_of(0) + 1)
    }

    // ── Headers ──

    /// The shared global header.
    pub fn phu(&self) -> Ref<'_, Header> {
        self.phu.borrow()
    }

    /// Mutable access to the shared global header. Edits are visible
    /// through every view of the same dataset.
    pub fn phu_mut(&self) -> RefMut<'_, Header> {
        self.phu.borrow_mut()
    }

    fn single_unit(&self) -> Result<&Rc<RefCell<NdData>>> {
        if !self.is_single {
            return Err(Error::InvalidOperation("this operation needs a single view"));
        }
        Ok(&self.units[0])
    }

    /// The subunit header of a single view.
    pub fn hdr(&self) -> Result<Ref<'_, Header>> {
        let unit = self.single_unit()?;
        Ok(Ref::map(unit.borrow(), |u| &u.header))
    }

    /// Mutable subunit header of a single view.
    pub fn hdr_mut(&self) -> Result<RefMut<'_, Header>> {
        let unit = self.single_unit()?;
        Ok(RefMut::map(unit.borrow_mut(), |u| &mut u.header))
    }

    // ── Planes of a single view ──

    /// The science pixels of a single view.
    pub fn data(&self) -> Result<Ref<'_, PixelArray>> {
        let unit = self.single_unit()?;
        Ok(Ref::map(unit.borrow(), |u| &u.data))
    }

    /// The variance plane of a single view, if attached.
    pub fn variance(&self) -> Result<Option<Ref<'_, PixelArray>>> {
        let unit = self.single_unit()?;
        Ok(Ref::filter_map(unit.borrow(), |u| u.variance()).ok())
    }

    /// The quality mask of a single view, if attached.
    pub fn mask(&self) -> Result<Option<Ref<'_, ndarray::ArrayD<u16>>>> {
        let unit = self.single_unit()?;
        Ok(Ref::filter_map(unit.borrow(), |u| u.mask()).ok())
    }

    /// The world-coordinate mapping of a single view, if attached.
    pub fn wcs(&self) -> Result<Option<Ref<'_, Wcs>>> {
        let unit = self.single_unit()?;
        Ok(Ref::filter_map(unit.borrow(), |u| u.wcs.as_ref()).ok())
    }

    /// The whole subunit of a single view.
    pub fn nddata(&self) -> Result<Ref<'_, NdData>> {
        Ok(self.single_unit()?.borrow())
    }

    /// Mutable access to the subunit of a single view. Mutations are
    /// visible through the parent handle too.
    pub fn nddata_mut(&self) -> Result<RefMut<'_, NdData>> {
        Ok(self.single_unit()?.borrow_mut())
    }

    // ── Structural edits ──

    fn require_top_level(&self) -> Result<()> {
        if self.indices.is_some() {
            return Err(Error::InvalidOperation(
                "structural edits are only allowed on a top-level handle",
            ));
        }
        Ok(())
    }

    fn check_global_name(&self, name: &str) -> Result<()> {
        if RESERVED_NAMES.contains(&name) {
            return Err(Error::StructuralConflict(String::from(name)));
        }
        if self.globals.borrow().contains_key(name) {
            return Err(Error::StructuralConflict(String::from(name)));
        }
        Ok(())
    }

    /// Append a payload to a top-level handle.
    ///
    /// Arrays become new subunits when unnamed or named `SCI`, and
    /// global array payloads under any other unreserved name. Tables
    /// become global side tables, auto-named when no name is given. A
    /// single-view handle is absorbed as one new subunit.
    pub fn append(
        &mut self,
        payload: impl Into<Payload>,
        name: Option<&str>,
        header: Option<Header>,
    ) -> Result<()> {
        self.require_top_level()?;
        match payload.into() {
            Payload::Array(data) => match name {
                None | Some("SCI") => {
                    let unit = match header {
                        Some(h) => NdData::with_header(data, h),
                        None => NdData::new(data),
                    };
                    debug!("appending subunit {}", self.units.len());
                    self.units.push(Rc::new(RefCell::new(unit)));
                }
                Some(other) => {
                    self.check_global_name(other)?;
                    self.globals
                        .borrow_mut()
                        .insert(String::from(other), Extra::Array(data));
                }
            },
            Payload::Unit(mut unit) => {
                if let Some(name) = name {
                    if name != "SCI" {
                        return Err(Error::StructuralConflict(String::from(name)));
                    }
                }
                if let Some(h) = header {
                    unit.header = h;
                }
                self.units.push(Rc::new(RefCell::new(unit)));
            }
            Payload::Table(table) => {
                let name = match name {
                    Some(n) => String::from(n),
                    None => format!("TABLE{}", self.globals.borrow().len() + 1),
                };
                self.check_global_name(&name)?;
                self.globals.borrow_mut().insert(name, Extra::Table(table));
            }
            Payload::Handle(other) => {
                if !other.is_single {
                    return Err(Error::UnsupportedPayload(
                        "only a single view can be absorbed as a subunit",
                    ));
                }
                let unit = other.units[0].borrow().clone();
                self.units.push(Rc::new(RefCell::new(unit)));
            }
        }
        Ok(())
    }

    /// Remove a subunit by index from a top-level handle. Views made
    /// earlier keep their own subunit lists and are unaffected.
    pub fn remove_unit(&mut self, index: usize) -> Result<()> {
        self.require_top_level()?;
        if index >= self.units.len() {
            return Err(Error::KeyNotFound(index.to_string()));
        }
        self.units.remove(index);
        Ok(())
    }

    /// Remove a global side payload by name.
    pub fn remove_table(&mut self, name: &str) -> Result<()> {
        self.require_top_level()?;
        self.globals
            .borrow_mut()
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::KeyNotFound(String::from(name)))
    }

    // ── Named payload access ──

    /// Attach a named payload at the current scope: to the subunit on a
    /// single view, globally otherwise.
    pub fn set_extra(&mut self, name: &str, payload: Extra) -> Result<()> {
        if RESERVED_NAMES.contains(&name) {
            return Err(Error::StructuralConflict(String::from(name)));
        }
        if self.is_single {
            self.units[0].borrow_mut().set_extra(name, payload);
        } else {
            self.globals.borrow_mut().insert(String::from(name), payload);
        }
        Ok(())
    }

    /// Attribute-style payload lookup. On a single view the subunit
    /// scope shadows the global scope.
    pub fn extra(&self, name: &str) -> Result<Ref<'_, Extra>> {
        if RESERVED_NAMES.contains(&name) {
            return Err(Error::StructuralConflict(String::from(name)));
        }
        if self.is_single {
            if let Ok(found) = Ref::filter_map(self.units[0].borrow(), |u| u.extra(name)) {
                return Ok(found);
            }
        }
        Ref::filter_map(self.globals.borrow(), |m| m.get(name))
            .map_err(|_| Error::KeyNotFound(String::from(name)))
    }

    /// Every name reachable through [`AstroData::extra`] or a
    /// descriptor, sorted.
    pub fn exposed(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self
            .class
            .descriptor_names()
            .map(String::from)
            .collect();
        names.extend(self.globals.borrow().keys().cloned());
        if self.is_single {
            names.extend(self.units[0].borrow().extra_names().map(String::from));
        }
        names
    }

    /// Global side payloads in attachment order.
    pub fn global_names(&self) -> Vec<String> {
        self.globals.borrow().keys().cloned().collect()
    }

    // ── Classification ──

    /// The resolved class of this dataset.
    pub fn class(&self) -> &ResolvedClass {
        &self.class
    }

    /// The dataset's label set. Computed once and cached; use
    /// [`AstroData::invalidate_tags`] after metadata edits that should
    /// change the labels.
    pub fn tags(&self) -> Result<BTreeSet<String>> {
        if let Some(cached) = self.tag_cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let class = Arc::clone(&self.class);
        let computed = tags::evaluate(self, class.rules())?;
        *self.tag_cache.borrow_mut() = Some(computed.clone());
        Ok(computed)
    }

    /// Drop the cached label set.
    pub fn invalidate_tags(&self) {
        *self.tag_cache.borrow_mut() = None;
    }

    /// Merged descriptor names, sorted.
    pub fn descriptors(&self) -> Vec<String> {
        self.class.descriptor_names().map(String::from).collect()
    }

    /// Evaluate a named descriptor. `Ok(None)` means the quantity is
    /// not available for this dataset.
    pub fn descriptor_value(&self, name: &str) -> Result<Option<Value>> {
        let class = Arc::clone(&self.class);
        let desc = class
            .descriptor(name)
            .ok_or_else(|| Error::KeyNotFound(String::from(name)))?;
        (desc.func)(self)
    }

    /// The header keyword behind a named quantity, if mapped.
    pub fn keyword_for(&self, name: &str) -> Option<String> {
        self.class.keyword_for(name).map(String::from)
    }

    // ── Filenames ──

    /// The backing path, if the handle came from or was written to disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The current filename component of the path.
    pub fn filename(&self) -> Option<&str> {
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
    }

    /// The filename the dataset had before any processing.
    pub fn orig_filename(&self) -> Option<&str> {
        self.orig_filename.as_deref()
    }

    /// Point the handle at a new path without writing.
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    /// Derive a new filename from the current one.
    ///
    /// With `strip` the original filename (as recorded at load time) is
    /// used as the base, discarding prefixes and suffixes added since.
    /// The first call records the original name under `ORIGNAME` in the
    /// global header.
    pub fn update_filename(
        &mut self,
        prefix: Option<&str>,
        suffix: Option<&str>,
        strip: bool,
    ) -> Result<()> {
        let current = match self.filename() {
            Some(n) => String::from(n),
            None => match &self.orig_filename {
                Some(o) => o.clone(),
                None => return Err(Error::InvalidOperation("no filename to update")),
            },
        };
        if self.orig_filename.is_none() {
            self.orig_filename = Some(current.clone());
            self.phu.borrow_mut().set_with_comment(
                "ORIGNAME",
                current.as_str(),
                "original filename prior to processing",
            );
        }
        let base = if strip {
            self.orig_filename.clone().unwrap_or(current)
        } else {
            current
        };
        let base_path = Path::new(&base);
        let stem = base_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(base.as_str());
        let ext = base_path
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let new_name = format!(
            "{}{}{}{}",
            prefix.unwrap_or(""),
            stem,
            suffix.unwrap_or(""),
            ext
        );
        let dir = self
            .path
            .as_deref()
            .and_then(Path::parent)
            .map(PathBuf::from)
            .unwrap_or_default();
        self.path = Some(dir.join(new_name));
        Ok(())
    }

    // ── Persistence ──

    /// Snapshot this view as an in-memory file image.
    pub fn to_datafile(&self) -> DataFile {
        let mut file = DataFile::new(self.phu.borrow().clone());
        for (pos, unit_rc) in self.units.iter().enumerate() {
            let unit = unit_rc.borrow();
            let ver = self.position_of(pos) as i64 + 1;
            let mut ext = Extension::image(Some("SCI"), Some(ver), unit.data.clone());
            for card in unit.header.iter() {
                if !is_structural(&card.keyword) {
                    ext.header.push(card.clone());
                }
            }
            if let Some(wcs) = &unit.wcs {
                for card in wcs.cards.iter() {
                    ext.header.push(card.clone());
                }
            }
            file.extensions.push(ext);
            if let Some(var) = unit.variance() {
                file.extensions
                    .push(Extension::image(Some("VAR"), Some(ver), var.clone()));
            }
            if let Some(mask) = unit.mask() {
                // Quality bits ride in a signed plane on disk.
                let signed = mask.mapv(|x| x as i32);
                file.extensions.push(Extension::image(
                    Some("DQ"),
                    Some(ver),
                    PixelArray::Int32(signed),
                ));
            }
            for (name, extra) in unit.extras() {
                file.extensions.push(extra_extension(name, Some(ver), extra));
            }
        }
        for (name, extra) in self.globals.borrow().iter() {
            file.extensions.push(extra_extension(name, None, extra));
        }
        file
    }

    /// Write this view to `path` and repoint the handle there.
    pub fn write(&mut self, path: &Path) -> Result<()> {
        self.to_datafile().write(path)?;
        self.path = Some(PathBuf::from(path));
        Ok(())
    }

    /// Write to the handle's current path.
    pub fn write_default(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or(Error::InvalidOperation("no filename set"))?;
        self.write(&path)
    }

    // ── Summary ──

    /// A human-readable structural summary of the view.
    pub fn info(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Filename: {}\n",
            self.filename().unwrap_or("(not on disk)")
        ));
        match self.tags() {
            Ok(tags) => {
                let tag_list: Vec<&str> = tags.iter().map(String::as_str).collect();
                out.push_str(&format!("Tags: {}\n", tag_list.join(" ")));
            }
            Err(e) => out.push_str(&format!("Tags: (error: {e})\n")),
        }
        out.push_str("\nPixels Extensions\n");
        out.push_str("Index  Content  Type    Dimensions  Format\n");
        for (pos, unit_rc) in self.units.iter().enumerate() {
            let unit = unit_rc.borrow();
            let dims: Vec<String> = unit.shape().iter().map(|d| d.to_string()).collect();
            out.push_str(&format!(
                "[{:>2}]   science  NdData  ({})  {}\n",
                self.position_of(pos),
                dims.join(", "),
                unit.data.type_name()
            ));
            for (name, extra) in unit.extras() {
                out.push_str(&format!("          .{name}  {}\n", extra.describe()));
            }
        }
        let globals = self.globals.borrow();
        if !globals.is_empty() {
            out.push_str("\nOther Extensions\n");
            for (name, extra) in globals.iter() {
                out.push_str(&format!("  {name}  {}\n", extra.describe()));
            }
        }
        out
    }
}

fn extra_extension(name: &str, extver: Option<i64>, extra: &Extra) -> Extension {
    match extra {
        Extra::Array(a) => Extension::image(Some(name), extver, a.clone()),
        Extra::Table(t) => {
            let mut header = Header::new();
            header.set("XTENSION", "BINTABLE");
            header.set("EXTNAME", name);
            if let Some(ver) = extver {
                header.set("EXTVER", ver);
            }
            Extension {
                header,
                payload: ExtPayload::Table(t.clone()),
            }
        }
    }
}

// ── Tests ──
