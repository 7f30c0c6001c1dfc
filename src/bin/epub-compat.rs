use std::env;
use std::fs;
use std::process::ExitCode;

use epub_compat::{report_file_path, validate_epub_file};

fn main() -> ExitCode {
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let mut rest = args.into_iter().skip(1).collect::<Vec<_>>();
    let no_save = pop_flag(&mut rest, "--no-save");

    if rest.is_empty() || rest[0] == "--help" || rest[0] == "-h" {
        print_help();
        return Ok(());
    }
    if rest.len() > 1 {
        return Err(format!("unexpected argument '{}'", rest[1]));
    }

    let path = rest.remove(0);
    let report = validate_epub_file(&path).map_err(|e| e.to_string())?;
    let rendered = report.render();
    print!("{}", rendered);

    if !no_save {
        let out = report_file_path(path.as_ref());
        fs::write(&out, &rendered)
            .map_err(|e| format!("could not write report '{}': {}", out.display(), e))?;
        println!("\nReport saved to: {}", out.display());
    }
    Ok(())
}

fn pop_flag(args: &mut Vec<String>, flag: &str) -> bool {
    if let Some(pos) = args.iter().position(|a| a == flag) {
        args.remove(pos);
        true
    } else {
        false
    }
}

fn print_help() {
    let help = r#"epub-compat - check EPUB structure and reader compatibility

USAGE:
  epub-compat <file.epub> [--no-save]

OPTIONS:
  --no-save   print the report only; do not write <name>_validation_report.txt

NOTES:
  - The report is written next to the input unless --no-save is given.
  - Fatal load errors (missing file, not a ZIP archive) exit non-zero.
"#;
    print!("{}", help);
}
