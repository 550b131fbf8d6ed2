//! Building data handles from sources.
//!
//! An [`AstroDataFactory`] owns its own class [`Registry`], so every
//! factory instance is fully isolated. It resolves a source to a class,
//! then maps the source's extensions onto subunits: science planes in
//! file order, variance and quality planes attached by version number,
//! everything else filed as a named payload at unit or global scope.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};

use crate::core::{self, AstroData};
use crate::error::Result;
use crate::fits::{DataFile, ExtPayload, Extension};
use crate::header::Header;
use crate::nddata::{Extra, NdData, Wcs};
use crate::registry::{CandidateClass, Registry};

/// Default name for science extensions.
pub const DEFAULT_EXTENSION: &str = "SCI";

/// Keywords that belong to the world-coordinate mapping; they are
/// lifted out of subunit headers into the opaque WCS payload.
fn is_wcs_keyword(keyword: &str) -> bool {
    const PREFIXES: [&str; 8] = [
        "CTYPE", "CRPIX", "CRVAL", "CDELT", "CUNIT", "CD", "PC", "CROTA",
    ];
    const EXACT: [&str; 5] = ["WCSAXES", "RADESYS", "EQUINOX", "LONPOLE", "LATPOLE"];
    EXACT.contains(&keyword)
        || PREFIXES
            .iter()
            .any(|p| keyword.starts_with(p) && keyword.len() > p.len())
}

/// Builds [`AstroData`] handles against an isolated class registry.
#[derive(Debug, Default)]
pub struct AstroDataFactory {
    registry: Registry,
}

impl AstroDataFactory {
    /// A factory knowing only the base class.
    pub fn new() -> Self {
        AstroDataFactory {
            registry: Registry::new(),
        }
    }

    /// Register a class.
    pub fn add_class(&mut self, class: &'static CandidateClass) -> Result<()> {
        self.registry.add_class(class)
    }

    /// Unregister a class by name.
    pub fn remove_class(&mut self, name: &str) -> Result<()> {
        self.registry.remove_class(name)
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Open a file from disk: read, resolve, map. The OS handle is
    /// closed before this returns on every path.
    pub fn open(&self, path: &Path) -> Result<AstroData> {
        let source = DataFile::read(path)?;
        let mut handle = self.from_source(source)?;
        let orig = handle
            .phu()
            .get_str("ORIGNAME")
            .map(String::from)
            .or_else(|| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from)
            });
        handle.set_path_and_origin(path.to_path_buf(), orig);
        Ok(handle)
    }

    /// Build a handle from an in-memory source.
    pub fn from_source(&self, source: DataFile) -> Result<AstroData> {
        let class = self.registry.resolve(&source)?;
        debug!("source resolved to class '{}'", class.name());

        let mut units: Vec<NdData> = Vec::new();
        let mut ver_to_unit: BTreeMap<i64, usize> = BTreeMap::new();
        let mut deferred: Vec<&Extension> = Vec::new();

        // First pass: science planes, in file order.
        for ext in &source.extensions {
            let is_science = matches!(ext.name(), None | Some(DEFAULT_EXTENSION));
            match (&ext.payload, is_science) {
                (ExtPayload::Image(data), true) => {
                    let idx = units.len();
                    let ver = ext.extver().unwrap_or(idx as i64 + 1);
                    ver_to_unit.entry(ver).or_insert(idx);
                    units.push(build_unit(data.clone(), &ext.header));
                }
                _ => deferred.push(ext),
            }
        }

        // Second pass: companion planes and named payloads.
        let mut var_seen = 0usize;
        let mut dq_seen = 0usize;
        let mut globals: Vec<(String, Extra)> = Vec::new();
        let mut table_counter = 0usize;
        for ext in deferred {
            let name = ext.name().map(String::from);
            match (&ext.payload, name.as_deref()) {
                (ExtPayload::Image(data), Some("VAR")) => {
                    var_seen += 1;
                    let ver = ext.extver().unwrap_or(var_seen as i64);
                    match ver_to_unit.get(&ver) {
                        Some(&idx) => units[idx].set_variance(data.clone())?,
                        None => warn!("variance plane {ver} has no matching subunit"),
                    }
                }
                (ExtPayload::Image(data), Some("DQ")) => {
                    dq_seen += 1;
                    let ver = ext.extver().unwrap_or(dq_seen as i64);
                    match ver_to_unit.get(&ver) {
                        Some(&idx) => {
                            let bits = match data {
                                crate::nddata::PixelArray::UInt8(a) => a.mapv(|x| x as u16),
                                crate::nddata::PixelArray::Int16(a) => a.mapv(|x| x as u16),
                                crate::nddata::PixelArray::Int32(a) => a.mapv(|x| x as u16),
                                crate::nddata::PixelArray::Int64(a) => a.mapv(|x| x as u16),
                                crate::nddata::PixelArray::Float32(a) => a.mapv(|x| x as u16),
                                crate::nddata::PixelArray::Float64(a) => a.mapv(|x| x as u16),
                            };
                            units[idx].or_mask(&bits)?;
                        }
                        None => warn!("quality plane {ver} has no matching subunit"),
                    }
                }
                (ExtPayload::Image(data), Some(other)) => {
                    let target = ext.extver().and_then(|v| ver_to_unit.get(&v));
                    match target {
                        Some(&idx) => {
                            units[idx].set_extra(other, Extra::Array(data.clone()));
                        }
                        None => globals.push((String::from(other), Extra::Array(data.clone()))),
                    }
                }
                (ExtPayload::Table(table), name) => {
                    let name = match name {
                        Some(n) => String::from(n),
                        None => {
                            table_counter += 1;
                            format!("TABLE{table_counter}")
                        }
                    };
                    let target = ext.extver().and_then(|v| ver_to_unit.get(&v));
                    match target {
                        Some(&idx) => units[idx].set_extra(&name, Extra::Table(table.clone())),
                        None => globals.push((name, Extra::Table(table.clone()))),
                    }
                }
                (ExtPayload::None, _) | (ExtPayload::Image(_), None) => {
                    debug!("skipping extension without usable payload");
                }
            }
        }

        let mut handle = AstroData::build(class, source.phu, units);
        for (name, payload) in globals {
            handle.set_global_payload(name, payload);
        }
        Ok(handle)
    }

    /// Build a handle from scratch. The class is resolved against a
    /// source synthesized from the given parts.
    pub fn create(&self, phu: Header, units: Vec<NdData>) -> Result<AstroData> {
        let mut synthetic = DataFile::new(phu.clone());
        for (i, unit) in units.iter().enumerate() {
            synthetic.extensions.push(Extension::image(
                Some(DEFAULT_EXTENSION),
                Some(i as i64 + 1),
                unit.data.clone(),
            ));
        }
        let class = self.registry.resolve(&synthetic)?;
        Ok(AstroData::build(class, phu, units))
    }
}

/// Split an extension header into science cards and the WCS payload.
fn build_unit(data: crate::nddata::PixelArray, ext_header: &Header) -> NdData {
    let mut header = Header::new();
    let mut wcs_cards = Header::new();
    for card in ext_header.iter() {
        if core::is_structural(&card.keyword) {
            continue;
        }
        if is_wcs_keyword(&card.keyword) {
            wcs_cards.push(card.clone());
        } else {
            header.push(card.clone());
        }
    }
    let mut unit = NdData::with_header(data, header);
    if !wcs_cards.is_empty() {
        unit.wcs = Some(Wcs { cards: wcs_cards });
    }
    unit
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::nddata::PixelArray;
    use crate::table::{Column, Table};
    use ndarray::{ArrayD, IxDyn};

    fn is_gmos(source: &DataFile) -> bool {
        source
            .phu
            .get_str("INSTRUME")
            .is_some_and(|v| v.starts_with("GMOS"))
    }

    static GMOS: CandidateClass = CandidateClass {
        name: "Gmos",
        parents: &["AstroData"],
        matcher: Some(is_gmos),
        tag_rules: &[],
        descriptors: &[],
        keywords: &[],
    };

    fn pixels(value: f32) -> PixelArray {
        PixelArray::Float32(ArrayD::from_elem(IxDyn(&[2, 2]), value))
    }

    fn source() -> DataFile {
        let mut phu = Header::new();
        phu.set("INSTRUME", "GMOS-N");
        let mut file = DataFile::new(phu);
        file.extensions
            .push(Extension::image(Some("SCI"), Some(1), pixels(1.0)));
        file.extensions
            .push(Extension::image(Some("SCI"), Some(2), pixels(2.0)));
        file
    }

    #[test]
    fn from_source_resolves_and_maps() {
        let mut factory = AstroDataFactory::new();
        factory.add_class(&GMOS).unwrap();
        let ad = factory.from_source(source()).unwrap();
        assert_eq!(ad.class().name(), "Gmos");
        assert_eq!(ad.len(), 2);
    }

    #[test]
    fn var_and_dq_attach_by_version() {
        let factory = AstroDataFactory::new();
        let mut file = source();
        file.extensions
            .push(Extension::image(Some("VAR"), Some(2), pixels(0.5)));
        let dq = ArrayD::from_elem(IxDyn(&[2, 2]), 4i16);
        file.extensions.push(Extension::image(
            Some("DQ"),
            Some(2),
            PixelArray::Int16(dq),
        ));
        let ad = factory.from_source(file).unwrap();
        let first = ad.index(0).unwrap();
        assert!(first.variance().unwrap().is_none());
        let second = ad.index(1).unwrap();
        assert!(second.variance().unwrap().is_some());
        assert_eq!(second.mask().unwrap().unwrap()[[0, 0]], 4);
    }

    #[test]
    fn named_image_becomes_a_unit_payload_or_global() {
        let factory = AstroDataFactory::new();
        let mut file = source();
        file.extensions
            .push(Extension::image(Some("PROFILE"), Some(1), pixels(3.0)));
        file.extensions
            .push(Extension::image(Some("THUMB"), None, pixels(4.0)));
        let ad = factory.from_source(file).unwrap();
        let first = ad.index(0).unwrap();
        assert!(first.extra("PROFILE").is_ok());
        assert!(ad.extra("THUMB").is_ok());
        assert!(ad.extra("PROFILE").is_err());
    }

    #[test]
    fn tables_attach_by_version_or_globally() {
        let factory = AstroDataFactory::new();
        let mut file = source();
        let mut t = Table::new();
        t.add_column("ID", Column::Int32(vec![1, 2])).unwrap();

        let mut unit_tbl = Header::new();
        unit_tbl.set("XTENSION", "BINTABLE");
        unit_tbl.set("EXTNAME", "OBJCAT");
        unit_tbl.set("EXTVER", 1i64);
        file.extensions.push(Extension {
            header: unit_tbl,
            payload: ExtPayload::Table(t.clone()),
        });

        let mut global_tbl = Header::new();
        global_tbl.set("XTENSION", "BINTABLE");
        global_tbl.set("EXTNAME", "REFCAT");
        file.extensions.push(Extension {
            header: global_tbl,
            payload: ExtPayload::Table(t),
        });

        let ad = factory.from_source(file).unwrap();
        assert!(ad.index(0).unwrap().extra("OBJCAT").is_ok());
        assert!(ad.extra("REFCAT").is_ok());
        assert_eq!(ad.global_names(), vec![String::from("REFCAT")]);
    }

    #[test]
    fn wcs_cards_are_lifted_from_the_unit_header() {
        let factory = AstroDataFactory::new();
        let mut file = source();
        if let Some(ext) = file.extensions.first_mut() {
            ext.header.set("CTYPE1", "RA---TAN");
            ext.header.set("CRPIX1", 1024.0);
            ext.header.set("GAIN", 2.0);
        }
        let ad = factory.from_source(file).unwrap();
        let view = ad.index(0).unwrap();
        assert!(view.hdr().unwrap().get("CTYPE1").is_none());
        assert_eq!(view.hdr().unwrap().get_float("GAIN"), Some(2.0));
        let wcs = view.wcs().unwrap().expect("wcs attached");
        assert_eq!(wcs.cards.get_str("CTYPE1"), Some("RA---TAN"));
    }

    #[test]
    fn create_resolves_against_a_synthesized_source() {
        let mut factory = AstroDataFactory::new();
        factory.add_class(&GMOS).unwrap();
        let mut phu = Header::new();
        phu.set("INSTRUME", "GMOS-S");
        let ad = factory
            .create(phu, vec![NdData::new(pixels(0.0))])
            .unwrap();
        assert_eq!(ad.class().name(), "Gmos");
        assert_eq!(ad.len(), 1);
    }

    #[test]
    fn factories_are_isolated() {
        let mut with_gmos = AstroDataFactory::new();
        with_gmos.add_class(&GMOS).unwrap();
        let plain = AstroDataFactory::new();

        let src = source();
        assert_eq!(
            with_gmos.from_source(src.clone()).unwrap().class().name(),
            "Gmos"
        );
        assert_eq!(
            plain.from_source(src).unwrap().class().name(),
            "AstroData"
        );
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let factory = AstroDataFactory::new();
        let err = factory.open(Path::new("/nonexistent/file.fits"));
        assert!(matches!(err, Err(Error::Io(_))));
    }
}
