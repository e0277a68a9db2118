//! # Commitment Subcommands
//!
//! `hash` prints the commitment of each file. `check` recomputes one and
//! compares it to an expected commitment, so an auditor holding the original
//! document can confirm it is the one the certificate was issued over.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use farmcert_core::{sha256_digest, ContentDigest};

/// Arguments for the `hash` subcommand.
#[derive(Args, Debug)]
pub struct HashArgs {
    /// Document files to hash.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Emit a JSON array instead of `<hex>  <path>` lines.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Document file to check.
    pub file: PathBuf,

    /// Expected commitment: 64 hex characters, optionally prefixed with
    /// `0x` or `sha256:`.
    pub commitment: String,
}

/// Read a file and compute its commitment.
pub fn hash_file(path: &Path) -> anyhow::Result<ContentDigest> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(sha256_digest(&bytes))
}

/// Execute `hash`. Always exits 0 unless a file cannot be read.
pub fn run_hash(args: &HashArgs) -> anyhow::Result<u8> {
    let mut entries = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let digest = hash_file(path)?;
        tracing::debug!(file = %path.display(), %digest, "hashed document");
        entries.push((path, digest));
    }

    if args.json {
        let out: Vec<serde_json::Value> = entries
            .iter()
            .map(|(path, digest)| {
                serde_json::json!({
                    "file": path.display().to_string(),
                    "sha256": digest.to_hex(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for (path, digest) in entries {
            println!("{}  {}", digest.to_hex(), path.display());
        }
    }
    Ok(0)
}

/// Execute `check`. Exit 0 on match, 1 on mismatch.
pub fn run_check(args: &CheckArgs) -> anyhow::Result<u8> {
    let expected: ContentDigest = args
        .commitment
        .parse()
        .with_context(|| format!("invalid commitment {:?}", args.commitment))?;
    let actual = hash_file(&args.file)?;

    if actual == expected {
        println!("OK {}", args.file.display());
        Ok(0)
    } else {
        println!("MISMATCH {}", args.file.display());
        println!("  expected {}", expected.to_hex());
        println!("  actual   {}", actual.to_hex());
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn document(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn hash_file_matches_in_memory_digest() {
        let file = document(b"identity scan");
        assert_eq!(hash_file(file.path()).unwrap(), sha256_digest(b"identity scan"));
    }

    #[test]
    fn hash_missing_file_is_an_error() {
        let err = hash_file(Path::new("/nonexistent/farmcert/doc.pdf")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn check_accepts_prefixed_commitments() {
        let file = document(b"eligibility");
        let hex = sha256_digest(b"eligibility").to_hex();
        for commitment in [hex.clone(), format!("0x{hex}"), format!("sha256:{hex}")] {
            let args = CheckArgs {
                file: file.path().to_path_buf(),
                commitment,
            };
            assert_eq!(run_check(&args).unwrap(), 0);
        }
    }

    #[test]
    fn check_detects_substituted_document() {
        let file = document(b"eligibility (edited)");
        let args = CheckArgs {
            file: file.path().to_path_buf(),
            commitment: sha256_digest(b"eligibility").to_hex(),
        };
        assert_eq!(run_check(&args).unwrap(), 1);
    }

    #[test]
    fn check_rejects_malformed_commitment() {
        let file = document(b"x");
        let args = CheckArgs {
            file: file.path().to_path_buf(),
            commitment: "abc".into(),
        };
        assert!(run_check(&args).is_err());
    }

    #[test]
    fn hash_multiple_files() {
        let a = document(b"a");
        let b = document(b"b");
        let args = HashArgs {
            files: vec![a.path().to_path_buf(), b.path().to_path_buf()],
            json: true,
        };
        assert_eq!(run_hash(&args).unwrap(), 0);
    }
}
