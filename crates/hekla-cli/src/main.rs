mod helper;
mod theme;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hekla::pattern::{PatternId, PatternKind, Visibility};
use hekla::source::{DataSource, FileSource};
use hekla::Endian;
use hekla_pat::{Level, PatternRun, Runtime, Value};

#[derive(Parser)]
#[command(name = "hekla", version, about = "Binary pattern runner powered by Hekla")]
struct Args {
    /// Pattern file to evaluate
    pattern: Option<PathBuf>,
    /// Data file the patterns are laid over
    #[arg(short, long)]
    data: Option<PathBuf>,
    /// Additional include search paths
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,
    /// Default endianness: "little" (default) or "big"
    #[arg(long)]
    endian: Option<String>,
    /// In-variables passed to the program, as NAME=VALUE
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut rt = Runtime::new();
    for path in &args.include {
        rt.add_include_path(path.clone());
    }
    if let Some(endian) = &args.endian {
        match endian.as_str() {
            "big" | "be" => rt.set_default_endianness(Endian::Big),
            "little" | "le" => rt.set_default_endianness(Endian::Little),
            other => {
                eprintln!("{}Error:{} unknown endianness '{other}'", theme::ERROR, theme::R);
                std::process::exit(2);
            }
        }
    }
    if let Some(data) = &args.data {
        if !load_data(&mut rt, data) {
            std::process::exit(1);
        }
    }
    let in_vars = match parse_in_vars(&args.set) {
        Ok(vars) => vars,
        Err(msg) => {
            eprintln!("{}Error:{} {msg}", theme::ERROR, theme::R);
            std::process::exit(2);
        }
    };

    // Non-interactive: evaluate a single pattern file.
    if let Some(pattern) = &args.pattern {
        match rt.execute_file(pattern, &in_vars) {
            Ok(mut run) => print_run(&mut run),
            Err(diag) => {
                eprintln!("{}Error:{} {diag}", theme::ERROR, theme::R);
                std::process::exit(1);
            }
        }
        return;
    }

    run_repl(rt, in_vars);
}

fn load_data(rt: &mut Runtime, path: &PathBuf) -> bool {
    match FileSource::open(path) {
        Ok(source) => {
            println!(
                "{}Loaded{} {} ({} bytes)",
                theme::SUCCESS,
                theme::R,
                path.display(),
                source.size()
            );
            rt.set_data_source(Arc::new(source));
            true
        }
        Err(err) => {
            eprintln!("{}Error:{} cannot open {}: {err}", theme::ERROR, theme::R, path.display());
            false
        }
    }
}

/// `NAME=VALUE` in-variables; values parse as integers when they look like
/// one, strings otherwise.
fn parse_in_vars(pairs: &[String]) -> Result<HashMap<String, Value>, String> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("'{pair}' is not of the form NAME=VALUE"))?;
        let value = if let Some(hex) = value.strip_prefix("0x") {
            u128::from_str_radix(hex, 16)
                .map(Value::Unsigned)
                .map_err(|_| format!("'{value}' is not a hexadecimal integer"))?
        } else if let Ok(n) = value.parse::<i128>() {
            Value::Signed(n)
        } else {
            Value::Str(value.to_string())
        };
        vars.insert(name.to_string(), value);
    }
    Ok(vars)
}

// ---------------------------------------------------------------------------
// Tree output
// ---------------------------------------------------------------------------

fn print_run(run: &mut PatternRun) {
    for (level, message) in run.console().to_vec() {
        let color = match level {
            Level::Error => theme::ERROR,
            Level::Warn => theme::WARNING,
            _ => theme::DIM,
        };
        eprintln!("{color}[{level}]{} {message}", theme::R);
    }

    let roots = run.roots().to_vec();
    for id in roots {
        print_pattern(run, id, 0);
    }

    let sections: Vec<(String, Vec<PatternId>)> = run
        .sections()
        .iter()
        .map(|s| (s.name.clone(), s.roots.clone()))
        .collect();
    for (name, roots) in sections {
        println!("{}section {name}{}", theme::BOLD, theme::R);
        for id in roots {
            print_pattern(run, id, 1);
        }
    }

    for (name, value) in run.out_vars().to_vec() {
        println!("{}out{} {name} = {value}", theme::DIM, theme::R);
    }
}

fn print_pattern(run: &mut PatternRun, id: PatternId, depth: usize) {
    let pattern = run.pattern(id);
    if pattern.visibility == Visibility::Hidden {
        return;
    }
    let offset = pattern.offset;
    let size = pattern.size;
    let name = pattern.name.clone();
    let type_label = pattern.kind.type_label().to_string();
    let comment = pattern.comment.clone();
    let children: Vec<PatternId> = pattern.kind.children().to_vec();
    let is_compound = matches!(
        pattern.kind,
        PatternKind::Array { .. }
            | PatternKind::Struct { .. }
            | PatternKind::Union { .. }
            | PatternKind::Padding { .. }
    );
    let is_bitfield = matches!(pattern.kind, PatternKind::Bitfield { .. });

    let value = if is_compound {
        String::new()
    } else {
        match run.render(id) {
            Ok(text) => format!(" = {}{text}{}", theme::PAT_VALUE, theme::R),
            Err(diag) => format!(" = {}<{diag}>{}", theme::ERROR, theme::R),
        }
    };
    let comment = match comment {
        Some(text) => format!(" {}// {text}{}", theme::COMMENT, theme::R),
        None => String::new(),
    };

    println!(
        "{}{}{offset:#010x}{} {}{name}{}: {}{type_label}[{size}]{}{value}{comment}",
        "  ".repeat(depth),
        theme::OFFSET,
        theme::R,
        theme::PAT_NAME,
        theme::R,
        theme::PAT_TYPE,
        theme::R,
    );

    if is_bitfield {
        if let Ok(fields) = run.bitfield_fields(id) {
            for (field, value) in fields {
                println!(
                    "{}{}.{field}{} = {value:#x}",
                    "  ".repeat(depth + 1),
                    theme::PAT_NAME,
                    theme::R,
                );
            }
        }
        return;
    }

    for child in children {
        print_pattern(run, child, depth + 1);
    }
}

// ---------------------------------------------------------------------------
// REPL
// ---------------------------------------------------------------------------

fn run_repl(mut rt: Runtime, in_vars: HashMap<String, Value>) {
    print_banner();

    let config = rustyline::Config::builder()
        .max_history_size(1000)
        .unwrap()
        .completion_type(rustyline::config::CompletionType::List)
        .edit_mode(rustyline::config::EditMode::Emacs)
        .build();

    let mut editor: rustyline::Editor<helper::PatHelper, rustyline::history::DefaultHistory> =
        rustyline::Editor::with_config(config).expect("Failed to create line editor");
    editor.set_helper(Some(helper::PatHelper::new()));

    let history_path = home_dir().join(".hekla_history");
    let _ = editor.load_history(&history_path);

    let mut last_run: Option<PatternRun> = None;

    loop {
        match editor.readline("▸ ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                editor.add_history_entry(trimmed).ok();

                if trimmed.starts_with('.') {
                    if !handle_dot_command(trimmed, &mut rt, &in_vars, &mut last_run) {
                        break;
                    }
                    continue;
                }

                match rt.execute(trimmed, &in_vars) {
                    Ok(mut run) => {
                        print_run(&mut run);
                        last_run = Some(run);
                    }
                    Err(diag) => eprintln!("{}Error:{} {diag}", theme::ERROR, theme::R),
                }
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(err) => {
                eprintln!("Readline error: {err}");
                break;
            }
        }
    }

    let _ = editor.save_history(&history_path);
}

/// Returns false when the REPL should exit.
fn handle_dot_command(
    command: &str,
    rt: &mut Runtime,
    in_vars: &HashMap<String, Value>,
    last_run: &mut Option<PatternRun>,
) -> bool {
    let mut parts = command.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match head {
        ".quit" | ".exit" => return false,
        ".help" => {
            println!(".data <file>     load a data file");
            println!(".open <file>     evaluate a pattern file");
            println!(".endian be|le    set the default endianness");
            println!(".sections        list sections of the last run");
            println!(".console         show the console log of the last run");
            println!(".quit            exit");
            println!();
            println!("Anything else is evaluated as pattern source, e.g.  u32 x @ 0;");
        }
        ".data" => {
            if rest.is_empty() {
                eprintln!("usage: .data <file>");
            } else {
                load_data(rt, &PathBuf::from(rest));
            }
        }
        ".open" => {
            if rest.is_empty() {
                eprintln!("usage: .open <file>");
            } else {
                match rt.execute_file(rest, in_vars) {
                    Ok(mut run) => {
                        print_run(&mut run);
                        *last_run = Some(run);
                    }
                    Err(diag) => eprintln!("{}Error:{} {diag}", theme::ERROR, theme::R),
                }
            }
        }
        ".endian" => match rest {
            "be" | "big" => rt.set_default_endianness(Endian::Big),
            "le" | "little" => rt.set_default_endianness(Endian::Little),
            _ => eprintln!("usage: .endian be|le"),
        },
        ".sections" => match last_run {
            Some(run) => {
                for section in run.sections() {
                    println!(
                        "{} {} ({} bytes, {} roots)",
                        section.id,
                        section.name,
                        section.data.size(),
                        section.roots.len()
                    );
                }
            }
            None => eprintln!("no run yet"),
        },
        ".console" => match last_run {
            Some(run) => {
                for (level, message) in run.console() {
                    println!("[{level}] {message}");
                }
            }
            None => eprintln!("no run yet"),
        },
        other => eprintln!("unknown command '{other}', try .help"),
    }
    true
}

fn print_banner() {
    println!(
        "{}hekla{} {} — binary pattern workbench",
        theme::BOLD,
        theme::R,
        env!("CARGO_PKG_VERSION")
    );
    println!("{}type .help for commands, end pattern source with ';'{}", theme::DIM, theme::R);
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}
