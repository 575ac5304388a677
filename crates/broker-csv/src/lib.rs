//! Chunked CSV Encoder (module F).
//!
//! `ChunkBuilder` accumulates rows into an in-memory gzip+CSV buffer
//! and rotates to a fresh chunk once the compressed size crosses a
//! configured threshold. The worker loop calls `write_row` for every
//! row it pulls from the target database, `should_rotate` between
//! batches, and `finish` to flush the final (possibly partial) chunk.
//!
//! No header row is written, matching the Python original and the
//! broker's published result contract, which carries column names in
//! `manifest.json` instead of a CSV header line.

use broker_sql::CellValue;
use flate2::write::GzEncoder;
use flate2::Compression;

pub struct ChunkBuilder {
    writer: csv::Writer<GzEncoder<Vec<u8>>>,
    rows_in_chunk: u64,
    max_bytes: u64,
}

/// A sealed chunk, ready to be handed to the object-store uploader.
pub struct SealedChunk {
    pub gzipped_csv: Vec<u8>,
    pub rows: u64,
}

impl ChunkBuilder {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .terminator(csv::Terminator::CRLF)
                .from_writer(GzEncoder::new(Vec::new(), Compression::default())),
            rows_in_chunk: 0,
            max_bytes,
        }
    }

    /// Append one row, rendering each cell via its CSV-field form.
    pub fn write_row(&mut self, row: &[CellValue]) -> std::io::Result<()> {
        let fields = row.iter().map(CellValue::to_csv_field);
        self.writer
            .write_record(fields)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.rows_in_chunk += 1;
        Ok(())
    }

    pub fn rows_in_chunk(&self) -> u64 {
        self.rows_in_chunk
    }

    /// Compressed bytes written to the rolling buffer so far. Flushing
    /// the CSV writer pushes any buffered record bytes into the gzip
    /// stream, and flushing the gzip stream performs a sync-flush that
    /// forces its pending output into the underlying `Vec` — the same
    /// two-stage flush the Python original performs (`text.flush();
    /// gz.flush()`) before checking `out.tell()`.
    pub fn buffered_bytes(&mut self) -> std::io::Result<u64> {
        self.writer.flush()?;
        Ok(self.writer.get_ref().get_ref().len() as u64)
    }

    pub fn should_rotate(&mut self) -> std::io::Result<bool> {
        Ok(self.rows_in_chunk > 0 && self.buffered_bytes()? >= self.max_bytes)
    }

    /// Seal the current chunk: flush CSV bytes through gzip and return
    /// the compressed buffer plus row count. The builder is consumed;
    /// callers start a fresh `ChunkBuilder` for the next chunk.
    pub fn finish(mut self) -> std::io::Result<SealedChunk> {
        self.writer.flush()?;
        let encoder = self
            .writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let gzipped_csv = encoder.finish()?;
        Ok(SealedChunk {
            gzipped_csv,
            rows: self.rows_in_chunk,
        })
    }
}
