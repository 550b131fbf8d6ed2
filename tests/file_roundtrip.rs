//! Write a dataset to disk and read it back through the factory.

use astrodata_core::{
    AstroDataFactory, CandidateClass, DataFile, DqBits, Header, NdData, PixelArray,
};
use ndarray::{Array2, ArrayD, IxDyn};

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

fn factory() -> AstroDataFactory {
    let mut f = AstroDataFactory::new();
    f.add_class(&GMOS).unwrap();
    f
}

fn science_unit() -> NdData {
    let data = Array2::from_shape_fn((8, 8), |(y, x)| (y * 8 + x) as f32);
    let mut unit = NdData::new(PixelArray::Float32(data.into_dyn()));
    unit.header.set("GAIN", 2.0);
    unit.set_variance(PixelArray::Float32(
        ArrayD::from_elem(IxDyn(&[8, 8]), 0.25f32),
    ))
    .unwrap();
    unit.or_mask(&ArrayD::from_elem(
        IxDyn(&[8, 8]),
        DqBits::SATURATED.bits(),
    ))
    .unwrap();
    unit
}

#[test]
fn write_then_reopen_preserves_structure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("N20260830S0001.fits");

    let f = factory();
    let mut phu = Header::new();
    phu.set("INSTRUME", "GMOS-N");
    phu.set("OBJECT", "M31");
    let mut ad = f.create(phu, vec![science_unit(), science_unit()]).unwrap();
    ad.write(&path).unwrap();

    let back = f.open(&path).unwrap();
    assert_eq!(back.class().name(), "Gmos");
    assert_eq!(back.len(), 2);
    assert_eq!(back.phu().get_str("OBJECT"), Some("M31"));
    assert_eq!(back.filename(), Some("N20260830S0001.fits"));

    let view = back.index(0).unwrap();
    assert_eq!(view.hdr().unwrap().get_float("GAIN"), Some(2.0));
    match &*view.data().unwrap() {
        PixelArray::Float32(a) => {
            assert_eq!(a.shape(), &[8, 8]);
            assert_eq!(a[[1, 2]], 10.0);
        }
        other => panic!("unexpected storage type: {other:?}"),
    }
    let variance = view.variance().unwrap().expect("variance survives");
    assert_eq!(variance.get_float(0), Some(0.25));
    let mask = view.mask().unwrap().expect("mask survives");
    assert_eq!(mask[[3, 3]], DqBits::SATURATED.bits());
}

#[test]
fn integer_pixels_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ints.fits");

    let f = factory();
    let data = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![-5i16, 0, 5, 100, -100, 32000]).unwrap();
    let mut phu = Header::new();
    phu.set("INSTRUME", "GMOS-N");
    let mut ad = f
        .create(phu, vec![NdData::new(PixelArray::Int16(data.clone()))])
        .unwrap();
    ad.write(&path).unwrap();

    let back = f.open(&path).unwrap();
    let view = back.index(0).unwrap();
    match &*view.data().unwrap() {
        PixelArray::Int16(a) => assert_eq!(a, &data),
        other => panic!("unexpected storage type: {other:?}"),
    };
}

#[test]
fn write_default_uses_the_updated_filename() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.fits");

    let f = factory();
    let mut phu = Header::new();
    phu.set("INSTRUME", "GMOS-N");
    let mut ad = f.create(phu, vec![science_unit()]).unwrap();
    ad.write(&path).unwrap();

    ad.update_filename(None, Some("_dark"), false).unwrap();
    ad.write_default().unwrap();
    assert!(dir.path().join("raw_dark.fits").exists());

    let back = f.open(&dir.path().join("raw_dark.fits")).unwrap();
    assert_eq!(back.phu().get_str("ORIGNAME"), Some("raw.fits"));
    assert_eq!(back.orig_filename(), Some("raw.fits"));
}

#[test]
fn reopened_file_round_trips_again() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.fits");
    let second = dir.path().join("b.fits");

    let f = factory();
    let mut phu = Header::new();
    phu.set("INSTRUME", "GMOS-N");
    let mut ad = f.create(phu, vec![science_unit()]).unwrap();
    ad.write(&first).unwrap();

    let mut back = f.open(&first).unwrap();
    back.phu_mut().set("OBSTYPE", "DARK");
    back.write(&second).unwrap();

    let last = f.open(&second).unwrap();
    assert_eq!(last.phu().get_str("OBSTYPE"), Some("DARK"));
    assert_eq!(last.len(), 1);
    assert!(last.index(0).unwrap().variance().unwrap().is_some());
}
