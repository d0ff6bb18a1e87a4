//! Post-processing of fetched archives: gunzip and untar.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
};

use anyhow::{Context, Error, Result};
use flate2::read::GzDecoder;
use indicatif::ProgressBar;
use tar::Archive;
use tracing::debug;

/// Decompresses `X.gz` into `X` next to it and returns the new path.
/// Files without a `.gz` suffix decompress into `X.out`.
pub fn gunzip(gz_path: &Path, remove: bool) -> Result<PathBuf, Error> {
    let target = match gz_path.extension() {
        Some(ext) if ext == "gz" => gz_path.with_extension(""),
        _ => {
            let mut name = gz_path.as_os_str().to_owned();
            name.push(".out");
            PathBuf::from(name)
        }
    };

    let input = File::open(gz_path).with_context(|| format!("opening {}", gz_path.display()))?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut output = BufWriter::new(
        File::create(&target).with_context(|| format!("creating {}", target.display()))?,
    );
    io::copy(&mut decoder, &mut output).with_context(|| format!("decompressing {}", gz_path.display()))?;

    if remove {
        fs::remove_file(gz_path)?;
    }
    debug!(from = %gz_path.display(), to = %target.display(), "gunzipped");

    Ok(target)
}

/// Extracts the tarball into `working_dir` and returns the extracted files.
///
/// Archives named `X.tar` usually unpack into a directory `X`; when it
/// exists its entries are returned, otherwise the archive's top-level
/// entries are.
pub fn untar(
    tar_path: &Path,
    working_dir: &Path,
    remove: bool,
    progress_bar: &ProgressBar,
) -> Result<Vec<PathBuf>, Error> {
    // First pass: count entries
    let total = Archive::new(File::open(tar_path)?).entries()?.count() as u64;
    progress_bar.set_length(total);

    // Second pass: extract
    let mut archive = Archive::new(File::open(tar_path)?);
    let mut top_level = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if let Some(first) = path.components().next() {
            let first = working_dir.join(first);
            if !top_level.contains(&first) {
                top_level.push(first);
            }
        }
        entry.unpack_in(working_dir)?;
        progress_bar.inc(1);
    }

    if remove {
        fs::remove_file(tar_path)?;
    }

    let stem = tar_path
        .file_name()
        .map(|n| n.to_string_lossy().trim_end_matches(".tar").to_string())
        .unwrap_or_default();
    let extract_dir = working_dir.join(stem);

    if extract_dir.is_dir() {
        let mut files = fs::read_dir(&extract_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, io::Error>>()?;
        files.sort();
        Ok(files)
    } else {
        Ok(top_level)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_gz(path: &Path, content: &[u8]) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
    }

    fn write_tar(path: &Path, entries: &[(&str, &[u8])]) {
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn should_gunzip_and_remove_archive() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("2016.csv.gz");
        write_gz(&gz, b"USC00437054,20160101,TMAX,-22,,,7,0700\n");

        let csv = gunzip(&gz, true).unwrap();

        assert_eq!(csv, dir.path().join("2016.csv"));
        assert_eq!(
            fs::read_to_string(&csv).unwrap(),
            "USC00437054,20160101,TMAX,-22,,,7,0700\n"
        );
        assert!(!gz.exists());
    }

    #[test]
    fn should_keep_archive_when_asked() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("readings.bin");
        write_gz(&gz, b"abc");

        let out = gunzip(&gz, false).unwrap();

        assert_eq!(out, dir.path().join("readings.bin.out"));
        assert!(gz.exists());
    }

    #[test]
    fn should_untar_into_named_directory() {
        let dir = TempDir::new().unwrap();
        let tar_path = dir.path().join("ghcnd_hcn.tar");
        write_tar(
            &tar_path,
            &[
                ("ghcnd_hcn/USC00011084.dly", &b"a"[..]),
                ("ghcnd_hcn/USC00012813.dly", &b"b"[..]),
            ],
        );

        let bar = ProgressBar::hidden();
        let files = untar(&tar_path, dir.path(), true, &bar).unwrap();

        assert_eq!(
            files,
            vec![
                dir.path().join("ghcnd_hcn/USC00011084.dly"),
                dir.path().join("ghcnd_hcn/USC00012813.dly"),
            ]
        );
        assert_eq!(bar.position(), 2);
        assert!(!tar_path.exists());
    }

    #[test]
    fn should_return_top_level_entries_without_named_directory() {
        let dir = TempDir::new().unwrap();
        let tar_path = dir.path().join("bundle.tar");
        write_tar(&tar_path, &[("a.tif", &b"1"[..]), ("b.tif", &b"2"[..])]);

        let files = untar(&tar_path, dir.path(), false, &ProgressBar::hidden()).unwrap();

        assert_eq!(files, vec![dir.path().join("a.tif"), dir.path().join("b.tif")]);
        assert!(tar_path.exists());
    }
}
