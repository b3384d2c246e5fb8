//! Recognition engine handles

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::tsv::parse_tsv_words;
use super::RecognizedWord;
use crate::error::{PdfInkError, Result};
use crate::image::DecodedImage;

/// A reusable text recognition backend.
///
/// Implementations must be safe to share across concurrent jobs; every call
/// is self-contained.
pub trait OcrEngine: Send + Sync {
    /// Make sure models for `language` can be loaded.
    ///
    /// Fails with `OcrEngineUnavailable` when they cannot.
    fn prepare(&self, language: &str) -> Result<()>;

    /// Recognize words in `image`, in the engine's reading order.
    ///
    /// Once `deadline` passes the engine gives up, releases whatever it was
    /// running and fails with `Timeout`.
    fn recognize(
        &self,
        image: &DecodedImage,
        language: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<RecognizedWord>>;
}

/// How often a running recognizer process is checked for exit
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settings for the `tesseract` command-line engine
#[derive(Debug, Clone)]
pub struct TesseractConfig {
    /// Program to run
    pub binary: PathBuf,
    /// Page segmentation mode (`--psm`); 3 is fully automatic
    pub page_segmentation: u8,
    /// OCR engine mode (`--oem`); 3 picks the default available
    pub engine_mode: u8,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            page_segmentation: 3,
            engine_mode: 3,
        }
    }
}

/// Runs the `tesseract` program, streaming the image through stdin and
/// reading TSV from stdout
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    config: TesseractConfig,
    version: String,
}

impl TesseractEngine {
    /// Check that the program runs and remember its version
    pub fn acquire(config: TesseractConfig) -> Result<Self> {
        let output = Command::new(&config.binary)
            .arg("--version")
            .output()
            .map_err(|e| unavailable(&config, e))?;
        if !output.status.success() {
            return Err(PdfInkError::OcrEngineUnavailable(format!(
                "{} --version exited with {}",
                config.binary.display(),
                output.status
            )));
        }

        // Older releases print the banner on stderr
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        let version = String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or("tesseract")
            .trim()
            .to_string();

        info!(binary = %config.binary.display(), %version, "OCR engine acquired");
        Ok(Self { config, version })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Languages with installed traineddata
    pub fn installed_languages(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.config.binary)
            .arg("--list-langs")
            .output()
            .map_err(|e| unavailable(&self.config, e))?;
        if !output.status.success() {
            return Err(PdfInkError::OcrEngineUnavailable(format!(
                "--list-langs exited with {}",
                output.status
            )));
        }

        // The listing goes to stdout on 4.x+, stderr on some 3.x builds
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_language_list(&text))
    }
}

impl OcrEngine for TesseractEngine {
    fn prepare(&self, language: &str) -> Result<()> {
        let installed = self.installed_languages()?;
        let missing: Vec<&str> = requested_languages(language)
            .into_iter()
            .filter(|lang| !installed.iter().any(|i| i.as_str() == *lang))
            .collect();

        if language.trim().is_empty() || !missing.is_empty() {
            return Err(PdfInkError::OcrEngineUnavailable(format!(
                "no traineddata for language '{}'",
                if missing.is_empty() {
                    language.to_string()
                } else {
                    missing.join("+")
                }
            )));
        }
        Ok(())
    }

    fn recognize(
        &self,
        image: &DecodedImage,
        language: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<RecognizedWord>> {
        let png = image
            .encode_png()
            .map_err(|e| PdfInkError::RecognitionFailure(e.to_string()))?;

        let started = Instant::now();
        let mut child = Command::new(&self.config.binary)
            .args(["stdin", "stdout", "-l", language])
            .arg("--psm")
            .arg(self.config.page_segmentation.to_string())
            .arg("--oem")
            .arg(self.config.engine_mode.to_string())
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| unavailable(&self.config, e))?;

        // Every pipe gets its own thread so a full buffer cannot stall the child
        let mut stdin = take_pipe(child.stdin.take(), "stdin")?;
        let writer = thread::spawn(move || stdin.write_all(&png));
        let stdout = drain(take_pipe(child.stdout.take(), "stdout")?);
        let stderr = drain(take_pipe(child.stderr.take(), "stderr")?);

        let status = match wait_until(&mut child, deadline) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(elapsed_ms, "tesseract killed after deadline");
                return Err(PdfInkError::Timeout(elapsed_ms));
            }
            Err(e) => {
                return Err(PdfInkError::RecognitionFailure(format!(
                    "waiting for tesseract: {}",
                    e
                )))
            }
        };
        let written = writer.join();
        let stdout = join_output(stdout)?;
        let stderr = join_output(stderr)?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(PdfInkError::RecognitionFailure(format!(
                "tesseract failed ({}): {}",
                status,
                stderr.trim()
            )));
        }
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(PdfInkError::RecognitionFailure(format!(
                    "writing image to tesseract: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(PdfInkError::RecognitionFailure(
                    "stdin writer panicked".to_string(),
                ))
            }
        }

        let tsv = String::from_utf8_lossy(&stdout);
        let words = parse_tsv_words(&tsv)?;
        debug!(
            width_px = image.width_px,
            height_px = image.height_px,
            words = words.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tesseract finished"
        );
        Ok(words)
    }
}

/// Wait for `child` to exit. Past `deadline` it is killed and reaped, and
/// `None` is returned.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> std::io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            // Already exited between the two checks is fine
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T> {
    pipe.ok_or_else(|| PdfInkError::RecognitionFailure(format!("{} not captured", name)))
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_output(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(Ok(buf)) => Ok(buf),
        Ok(Err(e)) => Err(PdfInkError::RecognitionFailure(format!(
            "reading tesseract output: {}",
            e
        ))),
        Err(_) => Err(PdfInkError::RecognitionFailure(
            "output reader panicked".to_string(),
        )),
    }
}

fn unavailable(config: &TesseractConfig, err: std::io::Error) -> PdfInkError {
    let reason = if err.kind() == ErrorKind::NotFound {
        "not installed or not on PATH".to_string()
    } else {
        err.to_string()
    };
    PdfInkError::OcrEngineUnavailable(format!("{}: {}", config.binary.display(), reason))
}

/// `eng+deu` -> `["eng", "deu"]`
pub(crate) fn requested_languages(language: &str) -> Vec<&str> {
    language
        .split('+')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Parse `tesseract --list-langs` output, skipping the header line
fn parse_language_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
        .filter(|line| !line.contains(' '))
        .map(str::to_string)
        .collect()
}
