//! Exchange of sequences with echidna through its corpus directory.

use crate::HashSet;
use hybrid_core::tx::TxSequence;
use hybrid_wrapper::echidna::{
    format::{decode_sequence, encode_sequence, FormatError},
    COVERAGE_DIR,
};
use sha1::{Digest, Sha1};
use std::{
    ffi::OsString,
    fmt,
    fs::{create_dir_all, read, read_dir, remove_file, rename, write},
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    Fuzzer,
    Solved,
    Seeded,
}

impl Provenance {
    fn of_file(name: &str) -> Self {
        if name.starts_with("solved-") {
            Provenance::Solved
        } else if name.starts_with("seeded-") {
            Provenance::Seeded
        } else {
            Provenance::Fuzzer
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Fuzzer => write!(f, "fuzzer"),
            Provenance::Solved => write!(f, "solved"),
            Provenance::Seeded => write!(f, "seeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub seq: TxSequence,
    pub provenance: Provenance,
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus dir {} inaccessible: {source}", dir.display())]
    Inaccessible { dir: PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode sequence: {0}")]
    Encode(#[from] FormatError),
}

/// Reader and writer of `<corpus>/coverage`.
///
/// Pushing takes `&mut self`, so one writer at a time; entries are written to
/// a hidden file first and renamed into place.
#[derive(Debug)]
pub struct CorpusSync {
    dir: PathBuf,
    seen_files: HashSet<OsString>,
    known: HashSet<TxSequence>,
}

impl CorpusSync {
    /// Open `<corpus_dir>/coverage`, creating it if needed.
    pub fn open(corpus_dir: &Path) -> Result<Self, CorpusError> {
        let dir = corpus_dir.join(COVERAGE_DIR);
        create_dir_all(&dir).map_err(|source| CorpusError::Inaccessible {
            dir: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            seen_files: HashSet::new(),
            known: HashSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of distinct sequences pulled or pushed so far.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Entries added since the last pull, in file name order.
    ///
    /// Unreadable or malformed files are logged and skipped for good.
    pub fn pull(&mut self) -> Result<Vec<CorpusEntry>, CorpusError> {
        let inaccessible = |source| CorpusError::Inaccessible {
            dir: self.dir.clone(),
            source,
        };
        let mut files = Vec::new();
        for entry in read_dir(&self.dir).map_err(inaccessible)? {
            let entry = entry.map_err(inaccessible)?;
            let name = entry.file_name();
            let path = entry.path();
            if path.extension().map_or(true, |e| e != "txt") || self.seen_files.contains(&name) {
                continue;
            }
            files.push((name, path));
        }
        files.sort();

        let mut ret = Vec::new();
        for (name, path) in files {
            self.seen_files.insert(name.clone());
            let data = match read(&path) {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("corpus corruption, {}: {}", path.display(), e);
                    continue;
                }
            };
            let seq = match decode_sequence(&data) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("corpus corruption, {}: {}", path.display(), e);
                    continue;
                }
            };
            if seq.is_empty() || !self.known.insert(seq.clone()) {
                continue;
            }
            ret.push(CorpusEntry {
                seq,
                provenance: Provenance::of_file(&name.to_string_lossy()),
            });
        }
        Ok(ret)
    }

    /// Write sequences not in the corpus yet, returns the number written.
    pub fn push(&mut self, seqs: &[TxSequence], provenance: Provenance) -> Result<usize, CorpusError> {
        let mut n = 0;
        for seq in seqs {
            if self.known.contains(seq) {
                continue;
            }
            let data = encode_sequence(seq)?;
            let name = format!("{}-{}.txt", provenance, hex::encode(Sha1::digest(&data)));
            let path = self.dir.join(&name);
            if !path.exists() {
                let tmp = self.dir.join(format!(".{}.tmp", name));
                if let Err(source) = write(&tmp, &data) {
                    let _ = remove_file(&tmp);
                    return Err(CorpusError::Write { path: tmp, source });
                }
                if let Err(source) = rename(&tmp, &path) {
                    let _ = remove_file(&tmp);
                    return Err(CorpusError::Write { path, source });
                }
                n += 1;
            }
            self.known.insert(seq.clone());
            self.seen_files.insert(OsString::from(name));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seq;
    use std::fs::{remove_dir_all, write};

    fn txt_files(dir: &Path) -> Vec<String> {
        let mut names = read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn pull_new_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = CorpusSync::open(tmp.path()).unwrap();
        assert!(c.pull().unwrap().is_empty());

        let dir = tmp.path().join(COVERAGE_DIR);
        write(dir.join("1.txt"), encode_sequence(&seq(&[1])).unwrap()).unwrap();
        write(dir.join("2.txt"), encode_sequence(&seq(&[1])).unwrap()).unwrap();
        write(dir.join("bad.txt"), b"{not json").unwrap();
        write(dir.join("ignored.json"), b"[]").unwrap();
        let got = c.pull().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].seq, seq(&[1]));
        assert_eq!(got[0].provenance, Provenance::Fuzzer);

        write(dir.join("3.txt"), encode_sequence(&seq(&[1, 2])).unwrap()).unwrap();
        let got = c.pull().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].seq, seq(&[1, 2]));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn push_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = CorpusSync::open(tmp.path()).unwrap();
        assert_eq!(c.push(&[seq(&[101]), seq(&[101])], Provenance::Solved).unwrap(), 1);
        assert_eq!(c.push(&[seq(&[101])], Provenance::Solved).unwrap(), 0);
        let names = txt_files(c.dir());
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("solved-") && names[0].ends_with(".txt"));
        // own entries are not pulled back
        assert!(c.pull().unwrap().is_empty());

        // a new sync over the same dir sees it once and does not rewrite it
        let mut c2 = CorpusSync::open(tmp.path()).unwrap();
        let got = c2.pull().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].provenance, Provenance::Solved);
        assert_eq!(c2.push(&[seq(&[101])], Provenance::Solved).unwrap(), 0);
        assert_eq!(txt_files(c.dir()).len(), 1);
    }

    #[test]
    fn failed_push_is_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = CorpusSync::open(tmp.path()).unwrap();
        remove_dir_all(c.dir()).unwrap();
        assert!(matches!(
            c.push(&[seq(&[101])], Provenance::Solved),
            Err(CorpusError::Write { .. })
        ));
        assert!(c.is_empty());

        create_dir_all(c.dir()).unwrap();
        assert_eq!(c.push(&[seq(&[101])], Provenance::Solved).unwrap(), 1);
        let names = txt_files(c.dir());
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("solved-"));
    }

    #[test]
    fn inaccessible_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = CorpusSync::open(tmp.path()).unwrap();
        remove_dir_all(c.dir()).unwrap();
        assert!(matches!(c.pull(), Err(CorpusError::Inaccessible { .. })));
    }
}
