use std::path::PathBuf;

use anyhow::Context;
use clap::builder::TypedValueParser;
use clap::{ArgGroup, Parser};

use crate::text::DEFAULT_MAX_LENGTH;
use crate::tts::DEFAULT_ENDPOINT;

/// Read text aloud through an online text-to-speech service.
#[derive(Parser, Debug)]
#[clap(name = "speak", arg_required_else_help = true)]
#[clap(group(ArgGroup::new("input").required(true).args(["file", "string"])))]
pub struct Args {
    /// Language to speak in, e.g. `en` or `uk`.
    #[clap(short, long, default_value = "en")]
    pub language: String,

    /// Speech speed multiplier, e.g. 0.75 or 1.5.
    #[clap(short = 'p', long, default_value_t = 1.0, value_parser = parse_speed)]
    pub speed: f32,

    /// File to read text from.
    #[clap(short, long)]
    pub file: Option<PathBuf>,

    /// Text to read.
    #[clap(short, long, num_args = 1..)]
    pub string: Option<Vec<String>>,

    /// Longest segment sent to the service, in characters.
    #[clap(long, default_value_t = DEFAULT_MAX_LENGTH, value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize))]
    pub max_length: usize,

    /// Audio player program. Must accept mplayer's `-af scaletempo -speed` flags.
    #[clap(long, default_value = "mplayer")]
    pub player: String,

    /// Text-to-speech service URL.
    #[clap(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Give up on a segment download after this many seconds.
    #[clap(long)]
    pub timeout_secs: Option<u64>,
}

impl Args {
    /// The text to speak, from `--file` or the `--string` words.
    pub fn input_text(&self) -> anyhow::Result<String> {
        if let Some(path) = &self.file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()));
        }
        Ok(self.string.as_deref().unwrap_or_default().join(" "))
    }
}

fn parse_speed(s: &str) -> Result<f32, String> {
    let speed: f32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !(speed.is_finite() && speed > 0.0) {
        return Err(format!("speed must be greater than zero, got {s}"));
    }
    Ok(speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("speak").chain(args.iter().copied()))
    }

    #[test]
    fn string_words_are_joined() {
        let args = parse(&["-s", "Hello", "big", "world"]).unwrap();
        assert_eq!(args.input_text().unwrap(), "Hello big world");
        assert_eq!(args.language, "en");
        assert_eq!(args.speed, 1.0);
        assert_eq!(args.max_length, 100);
    }

    #[test]
    fn file_input_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, "Text from a file.\n").unwrap();

        let args = parse(&["--file", path.to_str().unwrap(), "-l", "uk", "-p", "1.5"]).unwrap();
        assert_eq!(args.input_text().unwrap(), "Text from a file.\n");
        assert_eq!(args.language, "uk");
        assert_eq!(args.speed, 1.5);
    }

    #[test]
    fn missing_file_is_an_error() {
        let args = parse(&["-f", "/nonexistent/speak-input.txt"]).unwrap();
        assert!(args.input_text().is_err());
    }

    #[test]
    fn file_and_string_conflict() {
        let err = parse(&["-f", "a.txt", "-s", "hello"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn input_is_required() {
        let err = parse(&["-l", "en"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn no_arguments_prints_help() {
        let err = parse(&[]).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn speed_must_be_positive() {
        assert!(parse(&["-s", "hi", "-p", "0"]).is_err());
        assert!(parse(&["-s", "hi", "-p", "fast"]).is_err());
        assert!(parse(&["-s", "hi", "--max-length", "0"]).is_err());
    }

    #[test]
    fn max_length_is_configurable() {
        let args = parse(&["-s", "hi", "--max-length", "40"]).unwrap();
        assert_eq!(args.max_length, 40);
    }
}
