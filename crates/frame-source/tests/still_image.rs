use snapedit_common::ErrorKind;
use snapedit_frame_source::{probe_asset, FrameSource};
use snapedit_media_model::{MediaKind, PixelFormat};

#[test]
fn test_png_probes_and_decodes_to_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    let mut img = image::RgbaImage::new(4, 3);
    img.put_pixel(1, 2, image::Rgba([10, 20, 30, 255]));
    img.save(&path).unwrap();

    let asset = probe_asset(&path).unwrap();
    assert_eq!(asset.kind, MediaKind::Image);
    assert_eq!((asset.width, asset.height, asset.frame_count), (4, 3, 1));

    let mut source = FrameSource::open(&asset, 2).unwrap();
    let frame = source.next().unwrap().unwrap();
    assert_eq!(frame.index, 0);
    assert_eq!(frame.format, PixelFormat::Rgba8);
    assert_eq!(frame.rgba_at(1, 2), [10, 20, 30, 255]);
    assert_eq!(frame.data.len(), 4 * 3 * 4);
    drop(frame);
    assert!(source.next().unwrap().is_none());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = probe_asset(&dir.path().join("absent.jpg")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
}

#[test]
fn test_unknown_extension_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"hello").unwrap();
    let err = probe_asset(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
}

#[test]
fn test_garbage_png_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"definitely not a png").unwrap();
    let err = probe_asset(&path).unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::CorruptMedia | ErrorKind::UnsupportedFormat),
        "{err}"
    );
}
