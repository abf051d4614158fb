//! Emitting a captured buffer to a byte sink
//!
//! The output is the raw sample bytes, no header or framing: the reader has
//! to know the capture depth. Chunking only decides how the bytes are split
//! into writes, never what is written.

use embedded_io::Write;

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::timer::{Monotonic, TimingSample};

/// Writes captured samples to a sink in fixed-size, flushed chunks.
pub struct OutputStreamer<W> {
    sink: W,
    config: StreamConfig,
}

impl<W: Write> OutputStreamer<W> {
    /// Stream into `sink` using `config`.
    pub fn new(sink: W, config: StreamConfig) -> Self {
        OutputStreamer { sink, config }
    }

    /// Release the sink.
    pub fn free(self) -> W {
        self.sink
    }

    /// The sink.
    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Active configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Write `samples` in consecutive chunks, flushing after each one.
    ///
    /// The last chunk is short if the chunk size does not divide the length.
    /// Returns the number of bytes written, which is always `samples.len()`.
    pub fn emit(&mut self, samples: &[u8]) -> Result<usize, StreamError<W::Error>> {
        let chunk_size = self.config.chunk_size();
        if chunk_size == 0 || chunk_size > samples.len() {
            return Err(StreamError::InvalidChunkSize {
                chunk_size,
                len: samples.len(),
            });
        }

        for chunk in samples.chunks(chunk_size) {
            self.sink.write_all(chunk).map_err(StreamError::Sink)?;
            self.sink.flush().map_err(StreamError::Sink)?;
        }
        Ok(samples.len())
    }

    /// Emit `samples` once per configured pass, timing every pass.
    ///
    /// `on_pass` receives the pass index and its timing once the pass is
    /// flushed. With [`StreamConfig::report_elapsed`] the elapsed time is also
    /// written to the sink after each pass.
    pub fn measured_emit<T, F>(
        &mut self,
        samples: &[u8],
        timer: &T,
        mut on_pass: F,
    ) -> Result<(), StreamError<W::Error>>
    where
        T: Monotonic,
        F: FnMut(u32, TimingSample),
    {
        let passes = self.config.pass_count();
        if passes == 0 {
            return Err(StreamError::InvalidPassCount);
        }

        for pass in 0..passes {
            let start = timer.now();
            self.emit(samples)?;
            let end = timer.now();

            let timing = TimingSample { start, end };
            let elapsed = timing.elapsed().to_micros();
            info!("pass {}: {} bytes in {} us", pass, samples.len(), elapsed);

            if self.config.reports_elapsed() {
                write!(self.sink, "\nElapsed time: {} us\n", elapsed)?;
                self.sink.flush().map_err(StreamError::Sink)?;
            }
            on_pass(pass, timing);
        }
        Ok(())
    }
}
