use htmldtd_model::{binary, html, Dtd};
use htmldtd_parser::{
    diagnostics, Event, EventCollector, ParseAbort, Parser, ParserOptions, StrSource,
};

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
enum Cli {
    /// Parse a document and print its event stream
    Events {
        /// disable heuristic recovery
        #[structopt(long)]
        strict: bool,
        /// compiled grammar file; defaults to the built-in grammar
        #[structopt(long)]
        grammar: Option<PathBuf>,
        doc: PathBuf,
    },
    /// Parse documents and render any errors as diagnostics
    Check {
        #[structopt(long)]
        strict: bool,
        #[structopt(long)]
        grammar: Option<PathBuf>,
        docs: Vec<PathBuf>,
    },
    /// Write the built-in grammar as a compiled grammar file
    Compile { out: PathBuf },
}

fn main() {
    env_logger::init();
    match Cli::from_args() {
        Cli::Events {
            strict,
            grammar,
            doc,
        } => events(strict, grammar, doc),
        Cli::Check {
            strict,
            grammar,
            docs,
        } => check(strict, grammar, docs),
        Cli::Compile { out } => compile(out),
    }
}

fn load_grammar(path: Option<&PathBuf>) -> Arc<Dtd> {
    match path {
        None => html::dtd(),
        Some(p) => {
            let name = p
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("grammar")
                .to_string();
            let mut f = File::open(p).unwrap_or_else(|e| {
                eprintln!("cannot open grammar {:?}: {}", p, e);
                exit(1);
            });
            match binary::read_dtd(&name, &mut f) {
                Ok(dtd) => Arc::new(dtd),
                Err(e) => {
                    eprintln!("cannot load grammar {:?}: {}", p, e);
                    exit(1);
                }
            }
        }
    }
}

fn read_doc(path: &PathBuf) -> String {
    let mut f = File::open(path).unwrap_or_else(|e| {
        eprintln!("cannot open {:?}: {}", path, e);
        exit(1);
    });
    let mut doc = String::new();
    f.read_to_string(&mut doc).unwrap_or_else(|e| {
        eprintln!("cannot read {:?}: {}", path, e);
        exit(1);
    });
    doc
}

fn run_parser(dtd: Arc<Dtd>, strict: bool, doc: &str) -> EventCollector {
    let opts = ParserOptions {
        strict,
        ignore_charset: true,
    };
    let mut parser = Parser::with_options(dtd, opts, EventCollector::new());
    let mut src = StrSource::new(doc);
    match parser.parse(&mut src) {
        Ok(_) => {}
        Err(ParseAbort::Io(e)) => {
            eprintln!("read error: {}", e);
            exit(1);
        }
        // suppressed by ignore_charset
        Err(ParseAbort::CharsetChange { .. }) => unreachable!(),
    }
    parser.into_sink()
}

fn events(strict: bool, grammar: Option<PathBuf>, doc: PathBuf) {
    let dtd = load_grammar(grammar.as_ref());
    let source = read_doc(&doc);
    let collected = run_parser(dtd, strict, &source);
    for event in &collected.events {
        match event {
            Event::StartTag {
                name,
                attrs,
                pos,
                implied,
            } => {
                print!("START <{}", name);
                for (n, v) in attrs.iter() {
                    match v {
                        Some(v) => print!(" {}={:?}", n, v),
                        None => print!(" {}", n),
                    }
                }
                println!(">{} @{}", if *implied { " (implied)" } else { "" }, pos);
            }
            Event::EndTag { name, pos, implied } => {
                println!(
                    "END   </{}>{} @{}",
                    name,
                    if *implied { " (implied)" } else { "" },
                    pos
                );
            }
            Event::Text { text, pos } => println!("TEXT  {:?} @{}", text, pos),
            Event::Comment { text, pos } => println!("COMMENT {:?} @{}", text, pos),
            Event::Error { kind, message, pos } => {
                println!("ERROR {:?}: {} @{}", kind, message, pos)
            }
            Event::EndOfLine { eol } => println!("EOL   {:?}", eol),
        }
    }
}

fn check(strict: bool, grammar: Option<PathBuf>, docs: Vec<PathBuf>) {
    let dtd = load_grammar(grammar.as_ref());
    let mut failed = false;
    for doc in docs {
        let source = read_doc(&doc);
        let collected = run_parser(dtd.clone(), strict, &source);
        let errors: Vec<_> = collected
            .errors()
            .map(|(kind, msg, pos)| (kind, msg.to_string(), pos))
            .collect();
        if errors.is_empty() {
            continue;
        }
        failed = true;
        let (map, ds) = diagnostics(doc.to_string_lossy().to_string(), source, errors);
        let mut emitter = codemap_diagnostic::Emitter::stderr(
            codemap_diagnostic::ColorConfig::Auto,
            Some(&map),
        );
        emitter.emit(&ds[..]);
    }
    if failed {
        exit(2);
    }
}

fn compile(out: PathBuf) {
    let dtd = html::dtd();
    let mut f = File::create(&out).unwrap_or_else(|e| {
        eprintln!("cannot create {:?}: {}", out, e);
        exit(1);
    });
    if let Err(e) = binary::write_dtd(&dtd, &mut f) {
        eprintln!("cannot write {:?}: {}", out, e);
        exit(1);
    }
    eprintln!("wrote grammar {:?} to {:?}", dtd.name(), out);
}
