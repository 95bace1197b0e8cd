use super::*;

use crate::error::BalloonError;

#[test]
fn test_basic() {
    let hash = Hash::sha256_from_bytes(b"hello world");

    let expected_base16 = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
    assert_eq!(expected_base16, hash.to_typed_base16());
    assert_eq!(expected_base16, hash.to_string());
}

#[test]
fn test_empty() {
    let hash = Hash::sha256_from_bytes(b"");

    let expected_base16 = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    assert_eq!(expected_base16, hash.to_typed_base16());
}

#[test]
fn test_from_digest() {
    let mut hasher = Sha256::new();
    hasher.update(b"hello ");
    hasher.update(b"world");

    assert_eq!(
        Hash::sha256_from_bytes(b"hello world"),
        Hash::sha256_from_digest(hasher.finalize())
    );
}

#[test]
fn test_from_typed() {
    let base16 = "sha256:baeabdb75c223d171800c17b05c5e7e8e9980723a90eb6ffcc632a305afc5a42";
    let hash = Hash::from_typed(base16).unwrap();
    assert_eq!(base16, hash.to_typed_base16());

    assert!(matches!(
        Hash::from_typed("sha256"),
        Err(BalloonError::HashError(Error::NoColonSeparator))
    ));

    assert!(matches!(
        Hash::from_typed("sha256:"),
        Err(BalloonError::HashError(Error::InvalidHashStringLength { .. }))
    ));

    assert!(matches!(
        Hash::from_typed("sha256:0hjszid30ak3rkzvc3m94c3risg8wz2hayy100c1fg92bjvvvsms"),
        Err(BalloonError::HashError(Error::InvalidHashStringLength { .. }))
    ));

    assert!(matches!(
        Hash::from_typed("sha256:gggggggggggggggggggggggggggggggggggggggggggggggggggggggggggggggg"),
        Err(BalloonError::HashError(Error::InvalidBase16Hash(_)))
    ));

    assert!(matches!(
        Hash::from_typed("md5:invalid"),
        Err(BalloonError::HashError(Error::UnsupportedHashAlgorithm(alg))) if alg == "md5"
    ));
}

#[test]
fn test_serde() {
    let json = r#""sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9""#;
    let hash: Hash = serde_json::from_str(json).unwrap();

    assert_eq!(Hash::sha256_from_bytes(b"hello world"), hash);
    assert_eq!(json, serde_json::to_string(&hash).unwrap());
}
