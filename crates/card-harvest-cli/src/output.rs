//! Manifest writers: nested JSON for web targets, CSV for scans, JSON catalogs.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use card_harvest::Manifest;

pub const CSV_SEPARATOR: char = ',';

fn needs_quotes(cell: &str, sep: char) -> bool {
    cell.contains(sep) || cell.contains('"') || cell.contains('\n') || cell.contains('\r')
}

/// Write one row, quoting cells that contain the separator, quotes or newlines.
pub fn write_row<W: Write>(w: &mut W, row: &[String], sep: char) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, "{sep}")?;
        }
        if needs_quotes(cell, sep) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    writeln!(w)
}

pub fn write_table<W: Write>(w: &mut W, header: &[String], rows: &[Vec<String>]) -> io::Result<()> {
    write_row(w, header, CSV_SEPARATOR)?;
    for row in rows {
        write_row(w, row, CSV_SEPARATOR)?;
    }
    Ok(())
}

fn create(path: &Path) -> anyhow::Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Tabular manifest with `id_column` first and the file path last.
pub fn write_csv(path: &Path, manifest: &Manifest, id_column: &str) -> anyhow::Result<()> {
    let (header, rows) = manifest.to_rows(id_column);
    let mut w = create(path)?;
    write_table(&mut w, &header, &rows).with_context(|| format!("writing {}", path.display()))?;
    w.flush()?;
    tracing::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Nested `{ "<icons>": [...], "items": [...] }` manifest, pretty-printed.
pub fn write_json_manifest(path: &Path, manifest: &Manifest) -> anyhow::Result<()> {
    let mut w = create(path)?;
    serde_json::to_writer_pretty(&mut w, manifest)
        .with_context(|| format!("writing {}", path.display()))?;
    writeln!(w)?;
    w.flush()?;
    tracing::info!("Wrote {} items to {}", manifest.len(), path.display());
    Ok(())
}

/// `{ "<folder>": [stems...] }` listing.
pub fn write_catalog(path: &Path, listing: &BTreeMap<String, Vec<String>>) -> anyhow::Result<()> {
    let mut w = create(path)?;
    serde_json::to_writer_pretty(&mut w, listing)
        .with_context(|| format!("writing {}", path.display()))?;
    writeln!(w)?;
    w.flush()?;
    tracing::info!("Wrote {} folders to {}", listing.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_plain_row() {
        let mut out = Vec::new();
        write_row(&mut out, &row(&["trample", "3", "", "images/Brute/trample.png"]), ',').unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "trample,3,,images/Brute/trample.png\n");
    }

    #[test]
    fn test_quoted_cells() {
        let mut out = Vec::new();
        write_row(&mut out, &row(&["a,b", "say \"hi\"", "two\nlines"]), ',').unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\"a,b\",\"say \"\"hi\"\"\",\"two\nlines\"\n"
        );
    }
}
