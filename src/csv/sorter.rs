//! External Sorter (C9): orders a CSV file by
//! `(portfolio_id, transaction_date, transaction_type)`, choosing an
//! in-memory sort or a k-way external merge sort by input size.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::reader::header_index;
use crate::error::AccountingError;

#[derive(Debug, Clone)]
pub struct SortConfig {
    pub sort_threshold_bytes: u64,
    pub chunk_size: usize,
    pub working_dir: PathBuf,
}

type SortKey = (String, String, String);

fn sort_key(record: &csv::StringRecord, index: &std::collections::HashMap<&'static str, usize>) -> SortKey {
    let get = |field: &str| index.get(field).and_then(|&i| record.get(i)).unwrap_or("").to_string();
    (get("portfolio_id"), get("transaction_date"), get("transaction_type"))
}

/// Sorts `input_path` into `output_path`, preserving the header row.
/// Polled for cancellation between chunks (in-memory mode checks once;
/// external mode checks after every chunk and during the merge).
pub fn sort_file(
    input_path: &Path,
    output_path: &Path,
    config: &SortConfig,
    is_cancelled: impl Fn() -> bool,
) -> Result<(), AccountingError> {
    let file_len = std::fs::metadata(input_path)?.len();

    if file_len <= config.sort_threshold_bytes {
        sort_in_memory(input_path, output_path, is_cancelled)
    } else {
        sort_external(input_path, output_path, config, is_cancelled)
    }
}

fn sort_in_memory(
    input_path: &Path,
    output_path: &Path,
    is_cancelled: impl Fn() -> bool,
) -> Result<(), AccountingError> {
    let mut reader = csv::Reader::from_path(input_path)?;
    let headers = reader.headers()?.clone();
    let index = header_index(&headers)?;

    let mut rows: Vec<(SortKey, csv::StringRecord)> = Vec::new();
    for result in reader.records() {
        if is_cancelled() {
            return Err(AccountingError::Cancelled);
        }
        let record = result?;
        let key = sort_key(&record, &index);
        rows.push((key, record));
    }

    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(&headers)?;
    for (_, record) in rows {
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

struct HeapEntry {
    key: SortKey,
    spill_index: usize,
    record: csv::StringRecord,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest key on top.
        other.key.cmp(&self.key)
    }
}

fn sort_external(
    input_path: &Path,
    output_path: &Path,
    config: &SortConfig,
    is_cancelled: impl Fn() -> bool,
) -> Result<(), AccountingError> {
    std::fs::create_dir_all(&config.working_dir)?;

    let mut reader = csv::Reader::from_path(input_path)?;
    let headers = reader.headers()?.clone();
    let index = header_index(&headers)?;

    let mut spills: Vec<NamedTempFile> = Vec::new();
    let mut chunk: Vec<(SortKey, csv::StringRecord)> = Vec::with_capacity(config.chunk_size);

    let mut records_iter = reader.records();
    loop {
        if is_cancelled() {
            return Err(AccountingError::Cancelled);
        }

        match records_iter.next() {
            Some(result) => {
                let record = result?;
                let key = sort_key(&record, &index);
                chunk.push((key, record));
                if chunk.len() >= config.chunk_size {
                    spill_chunk(&mut chunk, &headers, &config.working_dir, &mut spills)?;
                }
            }
            None => break,
        }
    }
    if !chunk.is_empty() {
        spill_chunk(&mut chunk, &headers, &config.working_dir, &mut spills)?;
    }

    merge_spills(&spills, &headers, output_path, is_cancelled)
}

fn spill_chunk(
    chunk: &mut Vec<(SortKey, csv::StringRecord)>,
    headers: &csv::StringRecord,
    working_dir: &Path,
    spills: &mut Vec<NamedTempFile>,
) -> Result<(), AccountingError> {
    chunk.sort_by(|a, b| a.0.cmp(&b.0));

    let spill = NamedTempFile::new_in(working_dir)?;
    {
        let mut writer = csv::Writer::from_writer(BufWriter::new(spill.reopen()?));
        writer.write_record(headers)?;
        for (_, record) in chunk.iter() {
            writer.write_record(record)?;
        }
        writer.flush()?;
    }
    spills.push(spill);
    chunk.clear();
    Ok(())
}

fn merge_spills(
    spills: &[NamedTempFile],
    headers: &csv::StringRecord,
    output_path: &Path,
    is_cancelled: impl Fn() -> bool,
) -> Result<(), AccountingError> {
    let index = header_index(headers)?;

    let mut readers: Vec<csv::Reader<File>> = spills
        .iter()
        .map(|spill| -> Result<csv::Reader<File>, AccountingError> {
            let file = spill.reopen()?;
            Ok(csv::ReaderBuilder::new().has_headers(true).from_reader(file))
        })
        .collect::<Result<_, _>>()?;

    let mut heap = BinaryHeap::new();
    for (i, reader) in readers.iter_mut().enumerate() {
        if let Some(entry) = next_entry(reader, i, &index)? {
            heap.push(entry);
        }
    }

    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(headers)?;

    while let Some(top) = heap.pop() {
        if is_cancelled() {
            return Err(AccountingError::Cancelled);
        }
        writer.write_record(&top.record)?;
        if let Some(next) = next_entry(&mut readers[top.spill_index], top.spill_index, &index)? {
            heap.push(next);
        }
    }

    writer.flush()?;
    Ok(())
}

fn next_entry<R: Read>(
    reader: &mut csv::Reader<R>,
    spill_index: usize,
    index: &std::collections::HashMap<&'static str, usize>,
) -> Result<Option<HeapEntry>, AccountingError> {
    let mut record = csv::StringRecord::new();
    if reader.read_record(&mut record)? {
        let key = sort_key(&record, index);
        Ok(Some(HeapEntry { key, spill_index, record }))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "portfolio_id,security_id,source_id,transaction_type,quantity,price,transaction_date";

    fn write_input(dir: &Path, rows: &[&str]) -> PathBuf {
        let path = dir.join("in.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "{HEADER}").unwrap();
        for r in rows {
            writeln!(f, "{r}").unwrap();
        }
        path
    }

    fn read_rows(path: &Path) -> Vec<String> {
        let content = std::fs::read_to_string(path).unwrap();
        content.lines().skip(1).map(|s| s.to_string()).collect()
    }

    #[test]
    fn sorts_in_memory_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(
            dir.path(),
            &[
                "BBBBBBBBBBBBBBBBBBBBBBBB,,s3,BUY,1,1,20250201",
                "AAAAAAAAAAAAAAAAAAAAAAAA,,s1,DEP,1,1,20250101",
                "AAAAAAAAAAAAAAAAAAAAAAAA,,s2,DEP,1,1,20250102",
            ],
        );
        let output = dir.path().join("out.csv");
        let config = SortConfig { sort_threshold_bytes: 10 * 1024 * 1024, chunk_size: 2, working_dir: dir.path().to_path_buf() };
        sort_file(&input, &output, &config, || false).unwrap();

        let rows = read_rows(&output);
        assert!(rows[0].starts_with("AAAAAAAAAAAAAAAAAAAAAAAA,,s1"));
        assert!(rows[1].starts_with("AAAAAAAAAAAAAAAAAAAAAAAA,,s2"));
        assert!(rows[2].starts_with("BBBBBBBBBBBBBBBBBBBBBBBB"));
    }

    #[test]
    fn sorts_externally_with_small_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(
            dir.path(),
            &[
                "CCCCCCCCCCCCCCCCCCCCCCCC,,s1,DEP,1,1,20250103",
                "AAAAAAAAAAAAAAAAAAAAAAAA,,s2,DEP,1,1,20250101",
                "BBBBBBBBBBBBBBBBBBBBBBBB,,s3,DEP,1,1,20250102",
                "AAAAAAAAAAAAAAAAAAAAAAAA,,s4,DEP,1,1,20250102",
            ],
        );
        let output = dir.path().join("out.csv");
        let config = SortConfig { sort_threshold_bytes: 1, chunk_size: 2, working_dir: dir.path().to_path_buf() };
        sort_file(&input, &output, &config, || false).unwrap();

        let rows = read_rows(&output);
        assert_eq!(rows.len(), 4);
        assert!(rows[0].starts_with("AAAAAAAAAAAAAAAAAAAAAAAA,,s2"));
        assert!(rows[1].starts_with("AAAAAAAAAAAAAAAAAAAAAAAA,,s4"));
        assert!(rows[3].starts_with("CCCCCCCCCCCCCCCCCCCCCCCC"));
    }

    #[test]
    fn cancellation_aborts_sort() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &["AAAAAAAAAAAAAAAAAAAAAAAA,,s1,DEP,1,1,20250101"]);
        let output = dir.path().join("out.csv");
        let config = SortConfig { sort_threshold_bytes: 10 * 1024 * 1024, chunk_size: 2, working_dir: dir.path().to_path_buf() };
        let result = sort_file(&input, &output, &config, || true);
        assert!(matches!(result, Err(AccountingError::Cancelled)));
    }
}
