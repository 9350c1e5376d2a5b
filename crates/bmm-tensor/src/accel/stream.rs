use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use super::Accelerator;
use crate::backend::ComputeBackend;
use crate::cpu::CpuBackend;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::tensor::{bmm_dims, Tensor};

/// Commands executed in order by the device stream thread.
enum Command {
    Upload {
        id: u64,
        data: Vec<f32>,
    },
    BatchedMatmul {
        lhs: u64,
        rhs: u64,
        out: u64,
        dims: (usize, usize, usize, usize),
    },
    Download {
        id: u64,
        reply: Sender<std::result::Result<Vec<f32>, String>>,
    },
    Synchronize {
        reply: Sender<std::result::Result<(), String>>,
    },
    Residency {
        reply: Sender<usize>,
    },
    Free {
        id: u64,
    },
}

/// Emulated accelerator backed by a dedicated stream thread.
///
/// Device memory is owned by the stream thread and is only reachable through
/// commands, so host code cannot observe a result before the stream has
/// produced it. Kernels run on the `CpuBackend`. A kernel failure is sticky:
/// every later `download` or `synchronize` reports it.
#[derive(Debug)]
pub struct StreamAccelerator {
    ordinal: usize,
    tx: Sender<Command>,
    next_id: AtomicU64,
}

/// Buffer resident on a [`StreamAccelerator`].
#[derive(Debug)]
pub struct StreamBuffer {
    id: u64,
    ordinal: usize,
    shape: Shape,
    tx: Sender<Command>,
}

impl StreamBuffer {
    /// Shape of the tensor held by this buffer.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        // The stream may already be gone; nothing left to free then.
        let _ = self.tx.send(Command::Free { id: self.id });
    }
}

impl StreamAccelerator {
    /// Start a device stream bound to `ordinal`.
    pub fn new(ordinal: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("bmm-accel-{}", ordinal))
            .spawn(move || run_stream(rx))?;
        Ok(StreamAccelerator {
            ordinal,
            tx,
            next_id: AtomicU64::new(0),
        })
    }

    /// Number of buffers currently resident in device memory.
    ///
    /// Ordered after all previously queued commands.
    pub fn resident_buffers(&self) -> Result<usize> {
        let (reply, rx) = mpsc::channel();
        self.enqueue(Command::Residency { reply })?;
        rx.recv().map_err(|_| self.stream_gone())
    }

    fn alloc(&self, shape: Shape) -> StreamBuffer {
        StreamBuffer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            ordinal: self.ordinal,
            shape,
            tx: self.tx.clone(),
        }
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| self.stream_gone())
    }

    fn check_resident(&self, buffer: &StreamBuffer) -> Result<()> {
        if buffer.ordinal != self.ordinal {
            return Err(TensorError::Device(format!(
                "buffer belongs to device {}, not device {}",
                buffer.ordinal, self.ordinal
            )));
        }
        Ok(())
    }

    fn stream_gone(&self) -> TensorError {
        TensorError::Device(format!("stream for device {} has shut down", self.ordinal))
    }
}

impl Accelerator for StreamAccelerator {
    type Buffer = StreamBuffer;

    fn name(&self) -> &str {
        "stream"
    }

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn upload(&self, host: &Tensor) -> Result<StreamBuffer> {
        let buffer = self.alloc(host.shape().clone());
        self.enqueue(Command::Upload {
            id: buffer.id,
            data: host.data().to_vec(),
        })?;
        Ok(buffer)
    }

    fn batched_matmul(&self, lhs: &StreamBuffer, rhs: &StreamBuffer) -> Result<StreamBuffer> {
        self.check_resident(lhs)?;
        self.check_resident(rhs)?;
        let (batch, m, k, n) = bmm_dims(&lhs.shape, &rhs.shape)?;

        let out = self.alloc(Shape::new(vec![batch, m, n]));
        self.enqueue(Command::BatchedMatmul {
            lhs: lhs.id,
            rhs: rhs.id,
            out: out.id,
            dims: (batch, m, k, n),
        })?;
        Ok(out)
    }

    fn download(&self, buffer: &StreamBuffer) -> Result<Tensor> {
        self.check_resident(buffer)?;
        let (reply, rx) = mpsc::channel();
        self.enqueue(Command::Download {
            id: buffer.id,
            reply,
        })?;
        let data = rx
            .recv()
            .map_err(|_| self.stream_gone())?
            .map_err(TensorError::Device)?;
        Tensor::try_new(data, buffer.shape.clone())
    }

    fn synchronize(&self) -> Result<()> {
        let (reply, rx) = mpsc::channel();
        self.enqueue(Command::Synchronize { reply })?;
        rx.recv()
            .map_err(|_| self.stream_gone())?
            .map_err(TensorError::Device)
    }
}

/// Stream thread body. Exits once every sender (device and buffers) is gone.
fn run_stream(rx: Receiver<Command>) {
    let backend = CpuBackend::new();
    let mut memory: HashMap<u64, Vec<f32>> = HashMap::new();
    let mut fault: Option<String> = None;

    while let Ok(command) = rx.recv() {
        match command {
            Command::Upload { id, data } => {
                memory.insert(id, data);
            }
            Command::BatchedMatmul {
                lhs,
                rhs,
                out,
                dims: (batch, m, k, n),
            } => {
                if fault.is_some() {
                    continue;
                }
                let result = match (memory.get(&lhs), memory.get(&rhs)) {
                    (Some(a), Some(b)) => backend
                        .batched_matmul(a, b, batch, m, k, n)
                        .map_err(|e| e.to_string()),
                    _ => Err(format!("kernel read from freed buffer ({} or {})", lhs, rhs)),
                };
                match result {
                    Ok(c) => {
                        memory.insert(out, c);
                    }
                    Err(e) => fault = Some(e),
                }
            }
            Command::Download { id, reply } => {
                let result = match (&fault, memory.get(&id)) {
                    (Some(f), _) => Err(f.clone()),
                    (None, Some(data)) => Ok(data.clone()),
                    (None, None) => Err(format!("buffer {} is not resident", id)),
                };
                let _ = reply.send(result);
            }
            Command::Synchronize { reply } => {
                let _ = reply.send(fault.clone().map_or(Ok(()), Err));
            }
            Command::Residency { reply } => {
                let _ = reply.send(memory.len());
            }
            Command::Free { id } => {
                memory.remove(&id);
            }
        }
    }
}
