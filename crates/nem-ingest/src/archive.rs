// Archive validation and CSV member extraction

use crate::error::{InvalidObjectReason, Result};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Check that `path` is a readable archive whose every member passes its CRC.
///
/// A structurally valid archive with no members is accepted.
pub fn validate_archive(path: &Path) -> std::result::Result<(), InvalidObjectReason> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        _ => return Err(InvalidObjectReason::FileMissing),
    };
    if metadata.len() == 0 {
        return Err(InvalidObjectReason::EmptyFile);
    }

    let file = File::open(path).map_err(|_| InvalidObjectReason::FileMissing)?;
    let mut archive = ZipArchive::new(file).map_err(|_| InvalidObjectReason::BadArchive)?;

    for index in 0..archive.len() {
        let mut member = archive
            .by_index(index)
            .map_err(|_| InvalidObjectReason::BadArchive)?;
        let name = member.name().to_string();

        // The zip reader checks the CRC once the member is read to EOF.
        io::copy(&mut member, &mut io::sink())
            .map_err(|_| InvalidObjectReason::BadMember(name.clone()))?;
        debug!("Archive member {} OK", name);
    }

    Ok(())
}

fn is_csv_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Read every `.csv` member into memory, keyed by base name and sorted.
pub fn extract_csv_members(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut members = Vec::new();

    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        if member.is_dir() {
            continue;
        }
        let full_name = member.name().to_string();
        let base_name = full_name
            .rsplit('/')
            .next()
            .unwrap_or(full_name.as_str())
            .to_string();
        if !is_csv_name(&base_name) {
            continue;
        }

        let mut bytes = Vec::with_capacity(usize::try_from(member.size()).unwrap_or(0));
        member.read_to_end(&mut bytes)?;
        members.push((base_name, bytes));
    }

    members.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(members)
}
