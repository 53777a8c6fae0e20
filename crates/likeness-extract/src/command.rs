//! External-process extractor.
//!
//! Wraps any face tool that reads an image file and prints detections as JSON
//! (a Python `face_recognition` or OpenCV script, a DeepFace wrapper, ...).
//! The tool is run as `<program> <args...> <image-path>` and must print:
//!
//! ```json
//! {"faces": [{"box": {"x": 10, "y": 12, "w": 80, "h": 80},
//!             "descriptor": [0.01, -0.2, ...],
//!             "score": 0.98}]}
//! ```
//!
//! `box` may also be a four-element array, read according to [`BoxFormat`].
//!
//! With a deadline set, a tool that outlives it is killed together with any
//! children it spawned, and the call fails with [`ExtractError::Timeout`].

use likeness_core::{DetectionResult, FaceBox, FaceDescriptor, FaceDetection, StrategyKind};
use likeness_ingress::DecodedImage;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::{DescriptorExtractor, ExtractError};

/// Encoding of array-form boxes in the tool's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxFormat {
    /// `[x, y, w, h]`
    Xywh,
    /// `[top, right, bottom, left]`, as landmark encoders report them.
    Trbl,
}

impl FromStr for BoxFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xywh" => Ok(Self::Xywh),
            "trbl" => Ok(Self::Trbl),
            other => Err(format!("unknown box format '{other}' (expected xywh or trbl)")),
        }
    }
}

#[derive(Deserialize)]
struct WireOutput {
    faces: Vec<WireFace>,
}

#[derive(Deserialize)]
struct WireFace {
    #[serde(rename = "box")]
    bbox: WireBox,
    descriptor: Vec<f32>,
    #[serde(default)]
    score: Option<f32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBox {
    Object { x: f64, y: f64, w: f64, h: f64 },
    Array([f64; 4]),
}

/// How often a running tool is polled for exit while a deadline is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Extractor backed by an external program.
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    box_format: BoxFormat,
    strategy: StrategyKind,
    timeout: Option<Duration>,
}

impl CommandExtractor {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        box_format: BoxFormat,
        strategy: StrategyKind,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            box_format,
            strategy,
            timeout: None,
        }
    }

    /// Kill the tool if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn run_tool(&self, image_path: &Path) -> Result<Output, ExtractError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(image_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a kill also reaches whatever the tool forked.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| ExtractError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let wait_err = |source| ExtractError::Wait {
            program: self.program.clone(),
            source,
        };

        let Some(timeout) = self.timeout else {
            let status = child.wait().map_err(wait_err)?;
            return Ok(collect(status, stdout, stderr));
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(wait_err)? {
                return Ok(collect(status, stdout, stderr));
            }
            if started.elapsed() >= timeout {
                kill_tree(&mut child);
                tracing::warn!(
                    program = %self.program,
                    timeout_ms = timeout.as_millis() as u64,
                    "extractor command timed out, killed"
                );
                // Reader threads finish on their own once the pipes close.
                return Err(ExtractError::Timeout {
                    program: self.program.clone(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn to_face_box(&self, wire: &WireBox) -> FaceBox {
        match *wire {
            WireBox::Object { x, y, w, h } => FaceBox::new(px(x), px(y), px(w), px(h)),
            WireBox::Array([a, b, c, d]) => match self.box_format {
                BoxFormat::Xywh => FaceBox::new(px(a), px(b), px(c), px(d)),
                BoxFormat::Trbl => FaceBox::from_trbl(px(a), px(b), px(c), px(d)),
            },
        }
    }

    fn parse(&self, stdout: &[u8]) -> Result<DetectionResult, ExtractError> {
        let wire: WireOutput =
            serde_json::from_slice(stdout).map_err(|e| ExtractError::Protocol(e.to_string()))?;

        let faces = wire
            .faces
            .into_iter()
            .map(|f| FaceDetection {
                bbox: self.to_face_box(&f.bbox),
                descriptor: FaceDescriptor::new(f.descriptor, self.strategy),
                score: f.score,
            })
            .collect();
        Ok(DetectionResult::new(faces))
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(
    status: std::process::ExitStatus,
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
) -> Output {
    Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    }
}

fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) has no memory-safety preconditions; the negative pid
        // targets the process group created for this child at spawn.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Round to the nearest pixel; faces partly outside the frame clamp at 0.
fn px(v: f64) -> u32 {
    if v.is_finite() {
        v.round().clamp(0.0, f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

impl DescriptorExtractor for CommandExtractor {
    fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    fn extract(&mut self, image: &DecodedImage) -> Result<DetectionResult, ExtractError> {
        // Dropped at the end of this call on every path, error or not.
        let scratch = image.materialize()?;

        let output = self.run_tool(scratch.path())?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(
                program = %self.program,
                status = ?output.status.code(),
                %stderr,
                "extractor command failed"
            );
            return Err(ExtractError::Command {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let result = self.parse(&output.stdout)?;
        tracing::debug!(
            program = %self.program,
            faces = result.len(),
            "extractor command finished"
        );
        Ok(result)
    }
}
