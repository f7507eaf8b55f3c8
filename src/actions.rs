//! GitHub Actions workflow commands: masking, step outputs and failure
//! annotations.

use std::fs::OpenOptions;
use std::io::{self, Stdout, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

pub struct Workflow<W: Write> {
    out: W,
    output_file: Option<PathBuf>,
}

impl Workflow<Stdout> {
    pub fn stdout(output_file: Option<PathBuf>) -> Self {
        Self::new(io::stdout(), output_file)
    }
}

impl<W: Write> Workflow<W> {
    pub fn new(out: W, output_file: Option<PathBuf>) -> Self {
        Self { out, output_file }
    }

    /// Ask the runner to redact `value` from all later log lines.
    pub fn add_mask(&mut self, value: &str) -> Result<()> {
        self.command("add-mask", "", value)
    }

    /// Publish a step output. Appends to `$GITHUB_OUTPUT` when the runner
    /// provides it, otherwise falls back to the legacy `set-output` command.
    pub fn set_output(&mut self, key: &str, value: &str) -> Result<()> {
        if value.contains('\n') || value.contains('\r') {
            bail!("output {} must be a single line", key);
        }
        match &self.output_file {
            Some(path) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                writeln!(file, "{}={}", key, value)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                Ok(())
            }
            None => self.command("set-output", &format!(" name={}", key), value),
        }
    }

    /// Emit an error annotation; the caller is responsible for the exit code.
    pub fn set_failed(&mut self, message: &str) -> Result<()> {
        self.command("error", "", message)
    }

    fn command(&mut self, name: &str, properties: &str, message: &str) -> Result<()> {
        writeln!(
            self.out,
            "::{}{}::{}",
            name,
            properties,
            escape_data(message)
        )
        .context("failed to write workflow command")?;
        self.out.flush().context("failed to flush workflow command")
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn written(workflow: Workflow<Vec<u8>>) -> String {
        String::from_utf8(workflow.into_inner()).unwrap()
    }

    #[test]
    fn mask_and_legacy_output_go_to_stdout() {
        let mut wf = Workflow::new(Vec::new(), None);
        wf.add_mask("ghs_secret").unwrap();
        wf.set_output("GITHUB_TOKEN", "ghs_secret").unwrap();
        insta::assert_snapshot!(written(wf), @r###"
        ::add-mask::ghs_secret
        ::set-output name=GITHUB_TOKEN::ghs_secret
        "###);
    }

    #[test]
    fn output_file_receives_key_value_lines() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("output");
        fs::write(&path, "EXISTING=1\n").unwrap();

        let mut wf = Workflow::new(Vec::new(), Some(path.clone()));
        wf.set_output("GITHUB_TOKEN", "ghs_secret").unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "EXISTING=1\nGITHUB_TOKEN=ghs_secret\n"
        );
        assert!(written(wf).is_empty());
    }

    #[test]
    fn multiline_output_is_rejected() {
        let mut wf = Workflow::new(Vec::new(), None);
        assert!(wf.set_output("GITHUB_TOKEN", "a\nb").is_err());
    }

    #[test]
    fn failure_message_is_escaped() {
        let mut wf = Workflow::new(Vec::new(), None);
        wf.set_failed("100% broken\nsee docs").unwrap();
        assert_eq!(written(wf), "::error::100%25 broken%0Asee docs\n");
    }
}
