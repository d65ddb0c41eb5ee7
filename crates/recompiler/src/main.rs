//! CLI entry point for the `gbrecomp` translator binary.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use recompiler::{analyze, emit_project, AnalyzerOptions, EmitOptions, TranslateError};
use runtime_core::Cartridge;
#[cfg(test)]
use tempfile as _;

const HELP_TEXT: &str =
    "Usage: gbrecomp <rom> -o <out_dir> [--trace] [--limit N] [--help]";

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    rom: PathBuf,
    out_dir: PathBuf,
    trace: bool,
    limit: Option<usize>,
}

#[derive(Debug)]
enum ParseResult {
    Args(CliArgs),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut rom: Option<PathBuf> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut trace = false;
    let mut limit: Option<usize> = None;

    while let Some(arg) = args.next() {
        if arg == "--help" {
            return Ok(ParseResult::Help);
        }

        if arg == "--trace" {
            trace = true;
            continue;
        }

        if arg == "--limit" {
            let value = args
                .next()
                .ok_or_else(|| String::from("missing value for --limit"))?;
            let parsed = value
                .to_string_lossy()
                .parse::<usize>()
                .map_err(|_| format!("invalid --limit value: {}", value.to_string_lossy()))?;
            limit = Some(parsed);
            continue;
        }

        if arg == "-o" {
            let value = args
                .next()
                .ok_or_else(|| String::from("missing value for -o"))?;
            out_dir = Some(PathBuf::from(value));
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if rom.is_some() {
            return Err(String::from("multiple ROM paths provided"));
        }
        rom = Some(PathBuf::from(arg));
    }

    let rom = rom.ok_or_else(|| String::from("missing ROM path"))?;
    let out_dir = out_dir.ok_or_else(|| String::from("missing output directory (-o)"))?;
    Ok(ParseResult::Args(CliArgs {
        rom,
        out_dir,
        trace,
        limit,
    }))
}

fn translate(args: &CliArgs) -> Result<(), TranslateError> {
    let bytes = fs::read(&args.rom)?;
    let cart = Cartridge::load(bytes)?;
    log::info!(
        "loaded \"{}\": {:?}, {} KiB ROM, {} B external RAM",
        cart.title,
        cart.mbc,
        cart.rom_size / 1024,
        cart.eram_size
    );

    let analysis = analyze(
        &cart,
        &AnalyzerOptions {
            trace: args.trace,
            limit: args.limit,
        },
    )?;
    log::info!(
        "discovered {} functions, {} blocks, {} instructions",
        analysis.functions.len(),
        analysis.blocks.len(),
        analysis.instructions_analyzed
    );

    let summary = emit_project(&cart, &analysis, &args.out_dir, &EmitOptions::default())?;
    println!(
        "wrote {} files ({} functions) to {}",
        summary.files,
        summary.functions,
        args.out_dir.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{HELP_TEXT}");
            ExitCode::SUCCESS
        }
        Ok(ParseResult::Args(args)) => {
            let level = if args.trace { "debug" } else { "info" };
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
                .init();

            match translate(&args) {
                Ok(()) => ExitCode::SUCCESS,
                Err(error) => {
                    eprintln!("error: {error}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{HELP_TEXT}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_args, CliArgs, ParseResult};
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn os(args: &[&str]) -> impl Iterator<Item = OsString> {
        args.iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_rom_and_output() {
        let result = parse_args(os(&["game.gb", "-o", "out"])).expect("valid args");
        let ParseResult::Args(args) = result else {
            panic!("expected parsed args");
        };
        assert_eq!(
            args,
            CliArgs {
                rom: PathBuf::from("game.gb"),
                out_dir: PathBuf::from("out"),
                trace: false,
                limit: None,
            }
        );
    }

    #[test]
    fn parses_trace_and_limit() {
        let result =
            parse_args(os(&["game.gb", "-o", "out", "--trace", "--limit", "5000"]))
                .expect("valid args");
        let ParseResult::Args(args) = result else {
            panic!("expected parsed args");
        };
        assert!(args.trace);
        assert_eq!(args.limit, Some(5000));
    }

    #[test]
    fn parses_help_flag() {
        let result = parse_args(os(&["--help"])).expect("help should parse");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_missing_output() {
        let error = parse_args(os(&["game.gb"])).expect_err("must require -o");
        assert!(error.contains("output directory"));
    }

    #[test]
    fn rejects_bad_limit() {
        let error = parse_args(os(&["game.gb", "-o", "out", "--limit", "many"]))
            .expect_err("must reject non-numeric limit");
        assert!(error.contains("invalid --limit"));
    }

    #[test]
    fn rejects_unknown_flags() {
        let error = parse_args(os(&["--frobnicate"])).expect_err("unknown flag");
        assert!(error.contains("unknown option"));
    }
}
