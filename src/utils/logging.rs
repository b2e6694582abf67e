use chrono::Local;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Plain-text transcript of completed exchanges.
///
/// User lines are prefixed with `You: `; assistant text is written as-is.
/// Pause markers are prefixed with `## `. Each entry is followed by a blank line.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    file_path: Option<String>,
    is_active: bool,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_log_file(&mut self, path: String) -> Result<String, Box<dyn std::error::Error>> {
        OpenOptions::new().create(true).append(true).open(&path)?;

        self.file_path = Some(path.clone());
        self.is_active = true;

        Ok(format!("Logging enabled to: {path}"))
    }

    pub fn toggle_logging(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        let Some(path) = self.file_path.clone() else {
            return Err("No log file specified. Use /log <filename> to enable logging first.".into());
        };
        if self.is_active {
            let marker = format!(
                "## Logging paused at {}",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            self.write_entry(&marker)?;
            self.is_active = false;
            Ok(format!("Logging paused (file: {path})"))
        } else {
            self.is_active = true;
            Ok(format!("Logging resumed to: {path}"))
        }
    }

    /// Append one finished exchange. No-op while paused or unset.
    pub fn log_exchange(
        &self,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if !self.is_active {
            return Ok(());
        }
        self.write_entry(&format!("You: {user_text}"))?;
        if !assistant_text.is_empty() {
            self.write_entry(assistant_text)?;
        }
        Ok(())
    }

    fn write_entry(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.file_path.as_deref() else {
            return Ok(());
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::new(file);

        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        writeln!(writer)?;

        writer.flush()?;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn status_string(&self) -> String {
        let file_name = |path: &str| {
            Path::new(path)
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned()
        };
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!("active ({})", file_name(path)),
            (Some(path), false) => format!("paused ({})", file_name(path)),
        }
    }
}
