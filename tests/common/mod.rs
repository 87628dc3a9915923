//! Shared fixtures: deterministic tar.gz layers with controllable gzip
//! headers.

#![allow(dead_code)]

use std::io::Write;

use flate2::{Compression, GzBuilder};

/// One member of a fixture tar.
pub enum Entry {
    File { name: String, data: Vec<u8> },
    Dir { name: String },
    Symlink { name: String, target: String },
}

pub fn file(name: &str, data: Vec<u8>) -> Entry {
    Entry::File {
        name: name.to_string(),
        data,
    }
}

pub fn dir(name: &str) -> Entry {
    Entry::Dir {
        name: name.to_string(),
    }
}

pub fn symlink(name: &str, target: &str) -> Entry {
    Entry::Symlink {
        name: name.to_string(),
        target: target.to_string(),
    }
}

/// Deterministic pseudo-random bytes (xorshift64*), so fixtures are
/// reproducible across runs without an RNG dependency.
pub fn random_data(seed: u64, len: usize) -> Vec<u8> {
    let mut x = seed.wrapping_mul(0x9e3779b97f4a7c15) | 1;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        let v = x.wrapping_mul(0x2545f4914f6cdd1d);
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.truncate(len);
    out
}

/// Serialize entries into an uncompressed tar stream.
pub fn build_tar(entries: &[Entry]) -> Vec<u8> {
    let mut b = tar::Builder::new(Vec::new());
    for entry in entries {
        match entry {
            Entry::File { name, data } => {
                let mut h = tar::Header::new_ustar();
                h.set_size(data.len() as u64);
                h.set_mode(0o644);
                h.set_uid(0);
                h.set_gid(0);
                h.set_device_major(0).unwrap();
                h.set_device_minor(0).unwrap();
                h.set_mtime(1_650_000_000);
                h.set_cksum();
                b.append_data(&mut h, name, data.as_slice()).unwrap();
            }
            Entry::Dir { name } => {
                let mut h = tar::Header::new_ustar();
                h.set_entry_type(tar::EntryType::Directory);
                h.set_size(0);
                h.set_mode(0o755);
                h.set_uid(0);
                h.set_gid(0);
                h.set_device_major(0).unwrap();
                h.set_device_minor(0).unwrap();
                h.set_cksum();
                b.append_data(&mut h, name, &b""[..]).unwrap();
            }
            Entry::Symlink { name, target } => {
                let mut h = tar::Header::new_ustar();
                h.set_entry_type(tar::EntryType::Symlink);
                h.set_size(0);
                h.set_mode(0o777);
                h.set_uid(0);
                h.set_gid(0);
                h.set_device_major(0).unwrap();
                h.set_device_minor(0).unwrap();
                b.append_link(&mut h, name, target).unwrap();
            }
        }
    }
    b.into_inner().unwrap()
}

/// Optional gzip header fields for a member.
#[derive(Default, Clone)]
pub struct GzOpts {
    pub filename: Option<String>,
    pub comment: Option<String>,
    pub extra: Option<Vec<u8>>,
}

impl GzOpts {
    pub fn filename(mut self, name: &str) -> Self {
        self.filename = Some(name.to_string());
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// Gzip `data` as a single member with the given header fields.
pub fn gzip_with(data: &[u8], opts: &GzOpts) -> Vec<u8> {
    let mut builder = GzBuilder::new();
    if let Some(name) = &opts.filename {
        builder = builder.filename(name.as_bytes());
    }
    if let Some(comment) = &opts.comment {
        builder = builder.comment(comment.as_bytes());
    }
    if let Some(extra) = &opts.extra {
        builder = builder.extra(extra.clone());
    }
    let mut enc = builder.write(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Entries → gzipped tar with a plain header.
pub fn build_tar_gz(entries: &[Entry]) -> Vec<u8> {
    gzip_with(&build_tar(entries), &GzOpts::default())
}
