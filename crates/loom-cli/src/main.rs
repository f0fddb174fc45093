use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use loom_editor_core::{CommitFormat, Editor, EditorConfig};
use miette::{IntoDiagnostic, Result, WrapErr};

#[derive(Parser)]
#[command(version, about = "loom - inspect and convert rich-text documents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Editor config (JSON)
    #[arg(long, global = true, env = "LOOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an HTML document and print it in another form
    Export {
        /// HTML file to load
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Html)]
        format: Format,

        /// Keep the outer paragraph in the commit form
        #[arg(long)]
        no_unwrap: bool,
    },
    /// Print the syntax decorations of every block
    Decorate {
        /// HTML file to load
        file: PathBuf,
    },
    /// Print the normalized document tree
    Normalize {
        /// HTML file to load
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Html,
    Markdown,
    /// What a commit would hand to the host
    Commit,
}

fn main() -> Result<()> {
    init_miette()?;
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Export {
            file,
            format,
            no_unwrap,
        } => {
            let mut config = config;
            if no_unwrap {
                config.commit_format = CommitFormat::FilteredMarkdown { unwrap: false };
            }
            let editor = open(&file, config)?;
            let out = match format {
                Format::Html => editor.to_html(),
                Format::Markdown => editor.to_markdown(),
                Format::Commit => editor.commit_content(),
            };
            println!("{out}");
        }
        Commands::Decorate { file } => {
            let mut editor = open(&file, config)?;
            print_decorations(&mut editor);
        }
        Commands::Normalize { file } => {
            let editor = open(&file, config)?;
            print!("{}", editor.document().outline());
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EditorConfig> {
    match path {
        Some(path) => EditorConfig::from_path(path).into_diagnostic(),
        None => Ok(EditorConfig::default()),
    }
}

fn open(file: &Path, config: EditorConfig) -> Result<Editor> {
    let markup = std::fs::read_to_string(file)
        .into_diagnostic()
        .wrap_err_with(|| format!("couldn't read {}", file.display()))?;
    tracing::debug!(file = %file.display(), bytes = markup.len(), "loaded document");
    Editor::from_html(&markup, config).into_diagnostic()
}

fn print_decorations(editor: &mut Editor) {
    let decorations = editor.decorations();
    let doc = editor.document();
    for block in doc.leaf_blocks() {
        if doc.is_void(block) {
            continue;
        }
        let texts = doc.texts_in(block);
        let mut spans = decorations
            .iter()
            .filter(|d| texts.contains(&d.anchor.key))
            .peekable();
        if spans.peek().is_none() {
            continue;
        }
        println!("{block} {:?}", doc.text_content(block));
        for d in spans {
            println!(
                "  {:<13} {}:{}..{}:{}",
                d.mark.as_str(),
                d.anchor.key,
                d.anchor.offset,
                d.focus.key,
                d.focus.offset
            );
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LOOM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

fn init_miette() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    Ok(())
}
