use crate::error::Result;
use crate::models::Listing;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const DEFAULT_OUT: &str = "willhaben_listings.csv";

pub const CSV_FIELDS: [&str; 6] = ["id", "listing_name", "price", "address", "apart_size", "link"];

const UTF8_BOM: &str = "\u{feff}";

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn cell(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn write_row<W: Write>(w: &mut W, row: &[&str]) -> io::Result<()> {
    for (idx, cell) in row.iter().enumerate() {
        if idx > 0 {
            w.write_all(b",")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    w.write_all(b"\r\n")
}

/// Write listings with a header row. The BOM keeps spreadsheet apps from
/// mangling umlauts.
pub fn write_listings<W: Write>(mut w: W, listings: &[Listing]) -> io::Result<()> {
    w.write_all(UTF8_BOM.as_bytes())?;
    write_row(&mut w, &CSV_FIELDS)?;
    for listing in listings {
        write_row(
            &mut w,
            &[
                cell(&listing.id),
                cell(&listing.title),
                cell(&listing.price),
                cell(&listing.address),
                cell(&listing.size),
                listing.link.as_str(),
            ],
        )?;
    }
    w.flush()
}

pub fn write_csv(listings: &[Listing], path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_listings(BufWriter::new(file), listings)?;
    info!("Wrote {} listings to {}", listings.len(), path.display());
    Ok(())
}
