//! FITS fixtures and temporary image files

use astrometry_client::Header;
use astrometry_client::fits::{Card, HeaderValue};
use std::path::{Path, PathBuf};

fn card(keyword: &str, value: HeaderValue, comment: Option<&str>) -> Card {
    Card::new(keyword, value, comment).expect("invalid fixture card")
}

/// WCS solution header as the service would return it
pub fn wcs_header() -> Header {
    let mut header = Header::new();
    header.set(card("SIMPLE", HeaderValue::Logical(true), Some("Standard FITS file")));
    header.set(card("BITPIX", HeaderValue::Integer(8), Some("ASCII or bytes array")));
    header.set(card("NAXIS", HeaderValue::Integer(0), Some("Minimal header")));
    header.set(card("WCSAXES", HeaderValue::Integer(2), Some("no comment")));
    header.set(card("CTYPE1", HeaderValue::Text("RA---TAN-SIP".to_string()), None));
    header.set(card("CTYPE2", HeaderValue::Text("DEC--TAN-SIP".to_string()), None));
    header.set(card("CRVAL1", HeaderValue::Real(10.6847083), Some("RA  of reference point")));
    header.set(card("CRVAL2", HeaderValue::Real(41.26875), Some("DEC of reference point")));
    header.set(card("CRPIX1", HeaderValue::Real(512.5), None));
    header.set(card("CRPIX2", HeaderValue::Real(384.5), None));
    header
}

/// Bytes of [`wcs_header`]
pub fn wcs_bytes() -> Vec<u8> {
    wcs_header().to_bytes()
}

/// A small 8-bit image: primary header plus one data block
pub fn image_bytes() -> Vec<u8> {
    let mut header = Header::new();
    header.set(card("SIMPLE", HeaderValue::Logical(true), None));
    header.set(card("BITPIX", HeaderValue::Integer(8), None));
    header.set(card("NAXIS", HeaderValue::Integer(2), None));
    header.set(card("NAXIS1", HeaderValue::Integer(48), None));
    header.set(card("NAXIS2", HeaderValue::Integer(60), None));
    header.set(card("OBJECT", HeaderValue::Text("M31".to_string()), None));

    let mut bytes = header.to_bytes();
    bytes.extend((0..2880u32).map(|i| (i % 251) as u8));
    bytes
}

/// Write `count` image files named `image-N.fits` into `dir`
pub fn write_images(dir: &Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("image-{}.fits", i));
            std::fs::write(&path, image_bytes()).expect("failed to write test image");
            path
        })
        .collect()
}
