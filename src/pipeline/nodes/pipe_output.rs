//! PipeOutput: streams raw frames into a named pipe.
//!
//! The `pipe-name` parameter names an existing path (usually a FIFO created
//! with `mkfifo`). It is opened write-only when the stream starts, so the
//! open blocks until a reader attaches, and closed when the stream ends.
//! Each frame is written as its native-endian `f32` bytes with no framing.

use crate::pipeline::buffer::{Buffer, Dims};
use crate::pipeline::compute::ComputeContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Filter, Flow, ProcessContext};
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::properties::Properties;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

static PORTS: &[PortDescriptor] = &[PortDescriptor::input("in", Some(2))];

pub struct PipeOutput {
    path: Option<PathBuf>,
    writer: Option<Box<dyn Write + Send>>,
    bytes_written: u64,
    frames_written: u64,
}

impl PipeOutput {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            writer: None,
            bytes_written: 0,
            frames_written: 0,
        }
    }

    pub fn from_properties(props: &Properties) -> PipelineResult<Self> {
        Ok(Self::new(props.get_str("pipe-name")?.map(PathBuf::from)))
    }

    /// Write into an already-open sink instead of opening `pipe-name`.
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        let mut sink = Self::new(None);
        sink.writer = Some(Box::new(writer));
        sink
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

/// Write all of `bytes`, continuing after short writes and interrupts.
fn write_fully(writer: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        match writer.write(&bytes[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("pipe accepted {} of {} bytes", written, bytes.len()),
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Filter for PipeOutput {
    fn name(&self) -> &str {
        "pipe-output"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn initialize(&mut self, _inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        if self.writer.is_some() {
            return Ok(Vec::new());
        }
        let path = self.path.as_ref().ok_or_else(|| {
            PipelineError::Configuration("pipe-output requires a 'pipe-name'".into())
        })?;
        tracing::info!("Opening pipe {}", path.display());
        let file = OpenOptions::new().write(true).open(path)?;
        self.writer = Some(Box::new(file));
        Ok(Vec::new())
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::Device("pipe-output used before initialize".into()))?;
        let bytes = io.inputs[0].as_bytes(io.compute)?;
        write_fully(writer.as_mut(), bytes)?;
        self.bytes_written += bytes.len() as u64;
        self.frames_written += 1;
        Ok(Flow::Emit)
    }

    fn finish(&mut self, _ctx: &ComputeContext) -> PipelineResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            tracing::info!(
                "Pipe closed after {} frames ({} bytes)",
                self.frames_written,
                self.bytes_written
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::Sequence;

    mock! {
        pub Pipe {}
        impl Write for Pipe {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
            fn flush(&mut self) -> io::Result<()>;
        }
    }

    fn write_frame(sink: &mut PipeOutput, data: Vec<f32>) -> PipelineResult<Flow> {
        let ctx = ComputeContext::new("test");
        let len = data.len();
        let input = Buffer::from_vec(Dims::d2(len, 1), data).unwrap();
        sink.initialize(std::slice::from_ref(&input), &ctx)?;
        let mut inputs = vec![input];
        let mut io = ProcessContext {
            inputs: &mut inputs,
            outputs: &mut [],
            compute: &ctx,
            iteration: 0,
        };
        sink.process(&mut io)
    }

    #[test]
    fn test_missing_pipe_name_is_configuration_error() {
        let mut sink = PipeOutput::from_properties(&Properties::new()).unwrap();
        let ctx = ComputeContext::new("test");
        assert!(matches!(
            sink.initialize(&[], &ctx),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_path_is_io_error() {
        let props = Properties::new().with("pipe-name", "/nonexistent/tomoflow/fifo");
        let mut sink = PipeOutput::from_properties(&props).unwrap();
        let ctx = ComputeContext::new("test");
        let err = sink.initialize(&[], &ctx).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_partial_writes_are_resumed() {
        let mut pipe = MockPipe::new();
        let mut seq = Sequence::new();
        pipe.expect_write()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(3));
        pipe.expect_write()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(io::Error::from(io::ErrorKind::Interrupted)));
        pipe.expect_write()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|buf| Ok(buf.len()));
        pipe.expect_flush().times(1).returning(|| Ok(()));

        let mut sink = PipeOutput::with_writer(pipe);
        assert_eq!(write_frame(&mut sink, vec![1.0, 2.0]).unwrap(), Flow::Emit);
        assert_eq!(sink.bytes_written(), 8);
        sink.finish(&ComputeContext::new("test")).unwrap();
    }

    #[test]
    fn test_write_error_is_fatal() {
        let mut pipe = MockPipe::new();
        pipe.expect_write()
            .returning(|_| Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        let mut sink = PipeOutput::with_writer(pipe);
        let err = write_frame(&mut sink, vec![1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_zero_length_write_is_error() {
        let mut pipe = MockPipe::new();
        pipe.expect_write().returning(|_| Ok(0));
        let mut sink = PipeOutput::with_writer(pipe);
        match write_frame(&mut sink, vec![1.0]) {
            Err(PipelineError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WriteZero),
            other => panic!("expected WriteZero, got {:?}", other),
        }
    }

    #[test]
    fn test_writes_raw_native_endian_floats() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let props = Properties::new().with("pipe-name", file.path().to_string_lossy().into_owned());
        let mut sink = PipeOutput::from_properties(&props).unwrap();
        write_frame(&mut sink, vec![1.5, -2.0, 3.25]).unwrap();
        sink.finish(&ComputeContext::new("test")).unwrap();

        let bytes = std::fs::read(file.path()).unwrap();
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
        assert_eq!(floats, vec![1.5, -2.0, 3.25]);
    }
}
