extern crate alloc;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use log::debug;
use pxs_boot::firmware::VolumeError;
use uefi::proto::media::file::{File, FileAttribute, FileMode, RegularFile};
use uefi::{CString16, Status, boot};

/// Whether the volume the loader was started from can be opened at all.
pub fn boot_volume_present() -> bool {
    boot::get_image_file_system(boot::image_handle()).is_ok()
}

/// Loads a file from the boot volume.
///
/// `path` is relative to the volume root; `/` is accepted as a separator.
///
/// # Errors
/// Returns a [`VolumeError`] in case of error.
pub fn load_file(path: &str) -> Result<Vec<u8>, VolumeError> {
    let path = uefi_path(path)?;

    let mut sfs = boot::get_image_file_system(boot::image_handle()).map_err(|e| {
        debug!("Failed to get file system: {e:?}");
        VolumeError::Read
    })?;

    let mut volume = sfs.open_volume().map_err(|e| {
        debug!("Failed to open root directory: {e:?}");
        VolumeError::Read
    })?;

    let handle = volume
        .open(&path, FileMode::Read, FileAttribute::empty())
        .map_err(|e| {
            debug!("Failed to open {path}: {e:?}");
            if e.status() == Status::NOT_FOUND {
                VolumeError::NotFound
            } else {
                VolumeError::Read
            }
        })?;

    let Some(mut file) = handle.into_regular_file() else {
        return Err(VolumeError::NotAFile);
    };

    // Get file size
    file.set_position(RegularFile::END_OF_FILE)
        .map_err(|_| VolumeError::Read)?;
    let size = file.get_position().map_err(|_| VolumeError::Read)?;

    // Seek back for actual reading
    file.set_position(0).map_err(|_| VolumeError::Read)?;

    let size = usize::try_from(size).map_err(|_| VolumeError::Read)?;
    let mut buf = vec![0u8; size];
    let read = file.read(&mut buf).map_err(|e| {
        debug!("Failed to read file contents: {e:?}");
        VolumeError::Read
    })?;

    if read != size {
        return Err(VolumeError::ShortRead {
            read,
            expected: size,
        });
    }

    Ok(buf)
}

fn uefi_path(path: &str) -> Result<CString16, VolumeError> {
    let native: String = path
        .chars()
        .map(|c| if c == '/' { '\\' } else { c })
        .collect();
    CString16::try_from(native.as_str()).map_err(|_| VolumeError::InvalidPath)
}
