use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use walkdir::WalkDir;

use crate::corpus::split_blocks;
use crate::tender::{BLOCK_END, BLOCK_START};

const PAGE_FILE_PREFIX: &str = "Page_";
const PARTIAL_CORPUS_PREFIX: &str = ".partial_corpus_";

/// Hex SHA-256 of the text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn page_file_name(page: u32) -> String {
    format!("{}{}.txt", PAGE_FILE_PREFIX, page)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Pages whose content made it into the corpus.
    pub merged: usize,
    /// `None` when there were no page files to merge.
    pub corpus_path: Option<PathBuf>,
}

/// Folds every page file in `pages_dir` into `corpus_path`, in page order, dropping pages whose
/// content was already merged and any tender block already written by an earlier page.
///
/// The corpus is assembled in a temporary file next to `corpus_path` and moved into place at
/// the end, so readers never observe a half-written corpus. Page files are deleted, merged or
/// not, only once that move succeeded; if it fails they stay put and the assembled temporary
/// corpus is kept on disk.
pub fn merge_pages(pages_dir: &Path, corpus_path: &Path) -> Result<MergeSummary> {
    let page_files = list_page_files(pages_dir)?;
    if page_files.is_empty() {
        warn!("⚠️ [MERGE] No page files found in {}", pages_dir.display());
        return Ok(MergeSummary { merged: 0, corpus_path: None });
    }
    info!(
        "[MERGE] Merging {} page files into {}",
        page_files.len(),
        corpus_path.display()
    );

    let parent = corpus_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    let mut corpus = Builder::new()
        .prefix(PARTIAL_CORPUS_PREFIX)
        .suffix(".txt")
        .tempfile_in(parent)
        .with_context(|| format!("creating temporary corpus in {}", parent.display()))?;

    let mut seen_pages = HashSet::new();
    let mut seen_blocks = HashSet::new();
    let mut merged = 0;

    for path in &page_files {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                error!("❌ [MERGE] Failed to read {}: {}", name, e);
                continue;
            }
        };
        let content = raw.trim();
        if content.is_empty() {
            warn!("⚠️ [MERGE] Skipping empty file {}", name);
            continue;
        }
        let page_hash = content_hash(content);
        if seen_pages.contains(&page_hash) {
            info!("🗑️ [MERGE] Skipping duplicate content from {}", name);
            continue;
        }

        let blocks = unique_blocks(content, &seen_blocks);
        if blocks.is_empty() {
            info!("🗑️ [MERGE] Every block in {} was already merged", name);
            seen_pages.insert(page_hash);
            continue;
        }
        let chunk = format!(
            "{}\n\n",
            blocks.iter().map(|(_, block)| block.as_str()).collect::<Vec<_>>().join("\n\n")
        );
        match append_chunk(&mut corpus, &chunk) {
            Ok(()) => {
                seen_pages.insert(page_hash);
                seen_blocks.extend(blocks.into_iter().map(|(hash, _)| hash));
                merged += 1;
                debug!("[MERGE] Merged {}", name);
            }
            Err(e) => error!("❌ [MERGE] Failed to append {}: {:#}", name, e),
        }
    }

    corpus.flush().context("flushing corpus")?;
    if let Err(e) = corpus.persist(corpus_path) {
        let reason = e.error.to_string();
        let kept = match e.file.keep() {
            Ok((_, kept)) => kept.display().to_string(),
            Err(keep_err) => format!("lost ({})", keep_err.error),
        };
        error!(
            "❌ [MERGE] Could not move corpus into {}: {}. Page files kept; assembled corpus: {}",
            corpus_path.display(),
            reason,
            kept
        );
        bail!("moving corpus into {}: {} (assembled corpus: {})", corpus_path.display(), reason, kept);
    }

    for path in &page_files {
        remove_page_file(path);
    }

    info!(
        "✅ [MERGE] Merged {} unique pages (of {} files) into {}",
        merged,
        page_files.len(),
        corpus_path.display()
    );
    Ok(MergeSummary { merged, corpus_path: Some(corpus_path.to_path_buf()) })
}

/// Appends `chunk` as a unit: on a failed write the corpus is cut back to where it was.
fn append_chunk(corpus: &mut NamedTempFile, chunk: &str) -> Result<()> {
    let start = corpus.stream_position().context("reading corpus position")?;
    if let Err(e) = corpus.write_all(chunk.as_bytes()) {
        corpus.as_file().set_len(start).context("truncating partial chunk")?;
        corpus.seek(SeekFrom::Start(start)).context("rewinding corpus")?;
        return Err(e).context("writing chunk");
    }
    Ok(())
}

fn remove_page_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        error!("❌ [MERGE] Failed to delete {}: {}", path.display(), e);
    }
}

/// Blocks of `content` not written yet, re-delimited and paired with their hash. Text without
/// block markers is one block. Repeats within `content` are dropped too.
fn unique_blocks(content: &str, seen: &HashSet<String>) -> Vec<(String, String)> {
    let mut fresh = HashSet::new();
    if !content.contains(BLOCK_START) {
        let hash = content_hash(content);
        return if seen.contains(&hash) { Vec::new() } else { vec![(hash, content.to_string())] };
    }
    split_blocks(content)
        .into_iter()
        .filter_map(|block| {
            let hash = content_hash(block);
            if seen.contains(&hash) || !fresh.insert(hash.clone()) {
                return None;
            }
            Some((hash, format!("{}\n{}\n{}", BLOCK_START, block, BLOCK_END)))
        })
        .collect()
}

/// Page files sorted by their embedded page number (natural order).
pub fn list_page_files(pages_dir: &Path) -> Result<Vec<PathBuf>> {
    if !pages_dir.is_dir() {
        return Ok(Vec::new());
    }
    let number = Regex::new(r"(\d+)").unwrap();

    let mut files: Vec<(u64, PathBuf)> = Vec::new();
    for entry in WalkDir::new(pages_dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("listing {}", pages_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(PAGE_FILE_PREFIX) || !name.ends_with(".txt") {
            continue;
        }
        let index = number
            .captures(&name)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .unwrap_or(0);
        files.push((index, entry.into_path()));
    }

    files.sort_by_key(|(index, _)| *index);
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_page(dir: &Path, page: u32, text: &str) {
        fs::write(dir.join(page_file_name(page)), text).unwrap();
    }

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let root = TempDir::new().unwrap();
        let pages = root.path().join("RawPages");
        fs::create_dir_all(&pages).unwrap();
        let corpus = root.path().join("Final_Tender_List_2025-04-10.txt");
        (root, pages, corpus)
    }

    #[test]
    fn merges_in_natural_page_order() {
        let (_root, pages, corpus) = setup();
        write_page(&pages, 10, "ten");
        write_page(&pages, 2, "two");
        write_page(&pages, 1, "one");

        let summary = merge_pages(&pages, &corpus).unwrap();

        assert_eq!(summary.merged, 3);
        assert_eq!(fs::read_to_string(&corpus).unwrap(), "one\n\ntwo\n\nten\n\n");
    }

    #[test]
    fn drops_duplicates_and_empty_pages_and_deletes_all_inputs() {
        let (_root, pages, corpus) = setup();
        write_page(&pages, 1, "block A\n");
        write_page(&pages, 2, "  block A");
        write_page(&pages, 3, "   \n");
        write_page(&pages, 4, "block B");

        let summary = merge_pages(&pages, &corpus).unwrap();

        assert_eq!(summary.merged, 2);
        assert_eq!(summary.corpus_path.as_deref(), Some(corpus.as_path()));
        let text = fs::read_to_string(&corpus).unwrap();
        assert_eq!(text.matches("block A").count(), 1);
        assert!(text.contains("block B"));
        assert_eq!(fs::read_dir(&pages).unwrap().count(), 0);
    }

    #[test]
    fn no_page_files_means_no_corpus() {
        let (_root, pages, corpus) = setup();

        let summary = merge_pages(&pages, &corpus).unwrap();

        assert_eq!(summary, MergeSummary { merged: 0, corpus_path: None });
        assert!(!corpus.exists());
    }

    #[test]
    fn all_duplicate_input_still_produces_a_corpus() {
        let (_root, pages, corpus) = setup();
        write_page(&pages, 1, "same");
        write_page(&pages, 2, "same");
        fs::write(pages.join(page_file_name(3)), "").unwrap();

        let summary = merge_pages(&pages, &corpus).unwrap();

        assert_eq!(summary.merged, 1);
        assert!(summary.corpus_path.is_some());
    }

    #[test]
    fn merge_is_idempotent_over_the_same_inputs() {
        let (root, pages, corpus) = setup();
        let inputs = [(1, "alpha"), (2, "beta"), (3, "alpha")];
        for (page, text) in inputs {
            write_page(&pages, page, text);
        }
        merge_pages(&pages, &corpus).unwrap();
        let first = fs::read_to_string(&corpus).unwrap();

        for (page, text) in inputs {
            write_page(&pages, page, text);
        }
        let second_corpus = root.path().join("second.txt");
        merge_pages(&pages, &second_corpus).unwrap();

        assert_eq!(first, fs::read_to_string(&second_corpus).unwrap());
    }

    #[test]
    fn blocks_repeated_across_pages_are_written_once() {
        let (_root, pages, corpus) = setup();
        let block = |serial: &str| format!("{}\n{}.\n<Title>T{}</Title>\n{}", BLOCK_START, serial, serial, BLOCK_END);
        write_page(&pages, 1, &format!("{}\n\n{}", block("1"), block("2")));
        write_page(&pages, 2, &format!("{}\n\n{}", block("2"), block("3")));

        let summary = merge_pages(&pages, &corpus).unwrap();

        assert_eq!(summary.merged, 2);
        let text = fs::read_to_string(&corpus).unwrap();
        let blocks = split_blocks(&text);
        assert_eq!(blocks.len(), 3);
        let unique: HashSet<&str> = blocks.iter().copied().collect();
        assert_eq!(unique.len(), blocks.len());
    }

    #[test]
    fn failed_corpus_move_keeps_page_files_and_assembled_corpus() {
        let (root, pages, corpus) = setup();
        write_page(&pages, 1, "first page");
        write_page(&pages, 2, "second page");
        fs::create_dir_all(corpus.join("occupied")).unwrap();

        assert!(merge_pages(&pages, &corpus).is_err());

        assert_eq!(list_page_files(&pages).unwrap().len(), 2);
        let partial: Vec<PathBuf> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(PARTIAL_CORPUS_PREFIX))
            .collect();
        assert_eq!(partial.len(), 1);
        assert_eq!(fs::read_to_string(&partial[0]).unwrap(), "first page\n\nsecond page\n\n");
    }

    #[test]
    fn content_hash_is_stable_hex() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
