//! Integration tests for mapped images backed by files on disk.

use std::io::Write;

use dotpal::{
    mapped::{FileView, ImageFormat, MappedImage},
    Error, Result,
};
use tempfile::NamedTempFile;

fn write_temp(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
}

fn elf_image(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    data[..4].copy_from_slice(b"\x7FELF");
    data[4] = 2;
    data[5] = 1;
    for (i, byte) in data.iter_mut().enumerate().skip(64) {
        *byte = (i % 251) as u8;
    }
    data
}

#[test]
fn whole_file_mapping() -> Result<()> {
    let contents = elf_image(0x3000);
    let file = write_temp(&contents);

    let image = MappedImage::from_file(file.path())?;
    assert_eq!(image.format(), ImageFormat::Elf);
    assert_eq!(image.len(), contents.len());
    assert_eq!(image.data(), &contents[..]);
    assert_eq!(image.data_slice(0x1000, 16)?, &contents[0x1000..0x1010]);
    assert!(matches!(
        image.data_slice(0x2FF0, 32),
        Err(Error::OutOfBounds)
    ));
    Ok(())
}

#[test]
fn unaligned_view_of_a_file() -> Result<()> {
    let contents = elf_image(0x3000);
    let file = write_temp(&contents);

    let image = MappedImage::map_view(file.path(), 0x1234, 0x100)?;
    assert_eq!(image.len(), 0x100);
    assert_eq!(image.data(), &contents[0x1234..0x1334]);
    assert_eq!(image.format(), ImageFormat::Unknown);

    let view = FileView::window(file.path(), 0x1234, 0x100)?;
    assert_eq!(view.offset(), 0x1234);
    Ok(())
}

#[test]
fn view_past_end_of_file_is_rejected() {
    let file = write_temp(&elf_image(0x100));
    assert!(matches!(
        MappedImage::map_view(file.path(), 0x80, 0x100),
        Err(Error::OutOfBounds)
    ));
    assert!(matches!(
        MappedImage::map_view(file.path(), u64::MAX, 1),
        Err(Error::OutOfBounds)
    ));
    assert!(matches!(
        MappedImage::map_view(file.path(), 0, 0),
        Err(Error::Empty)
    ));
}

#[test]
fn empty_and_missing_files() {
    let empty = NamedTempFile::new().unwrap();
    assert!(matches!(MappedImage::from_file(empty.path()), Err(Error::Empty)));

    let missing = empty.path().with_extension("missing");
    assert!(matches!(MappedImage::from_file(missing), Err(Error::Io(_))));
}

#[test]
fn archive_detection_from_file() -> Result<()> {
    let mut contents = b"!<arch>\n".to_vec();
    contents.resize(256, b' ');
    let file = write_temp(&contents);

    assert_eq!(MappedImage::from_file(file.path())?.format(), ImageFormat::Archive);
    Ok(())
}
