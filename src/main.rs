use clap::{Parser, Subcommand};
use sitepipe::config::{self, CONFIG_FILENAME, PipelineConfig};
use sitepipe::graph::{Runner, Task};
use sitepipe::pipeline::{Pipeline, StageId};
use sitepipe::{logging, output};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;

#[derive(Parser)]
#[command(name = "sitepipe")]
#[command(about = "Static-site asset pipeline with a live-reloading dev server")]
#[command(long_about = "\
Static-site asset pipeline with a live-reloading dev server

Compiles Sass, post-processes CSS (prefix, minify, lint, purge), bundles and
minifies scripts, copies markup, images and fonts, and stamps cache-bust
tokens. Sources live under src/, output goes to docs/.

Project structure:

  project/
  ├── sitepipe.toml           # Optional; see `sitepipe gen-config`
  ├── node_modules/@fortawesome/fontawesome-free/webfonts/
  └── src/
      ├── index.html          # Markup → docs/ (cb=<n> tokens rewritten)
      ├── scss/style.scss     # → docs/css/style.css + .map (_partials skipped)
      ├── css/*.css           # → docs/css/styles.css (`sitepipe run css`)
      ├── js/*.js             # → docs/js/all.js + .map
      └── assets/
          ├── img/            # → docs/assets/img/
          └── fonts/          # → docs/assets/fonts/

Pipelines:
  default   parallel(scss, js) → cachebust → watch
  bs        parallel(html, scss, js, img, fonts, icon-fonts) → cachebust → serve → watch
  build     parallel(html, scss, js, img, fonts, icon-fonts) → cachebust")]
#[command(version)]
struct Cli {
    /// Project directory
    #[arg(long, default_value = ".", global = true)]
    project: PathBuf,

    /// Config file [default: <project>/sitepipe.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase diagnostic output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Build styles and scripts, stamp cache-bust tokens, then watch
    Default,
    /// Full build, then serve the output with live reload and watch
    Bs,
    /// Full one-shot build
    Build,
    /// Run a single stage
    Run {
        #[arg(value_enum)]
        stage: StageId,
    },
    /// Validate config and list each stage's inputs without building
    Check,
    /// Print a stock sitepipe.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet)?;

    let task = match cli.command.unwrap_or(Command::Default) {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            return Ok(());
        }
        Command::Check => {
            let (project, config) = load_project(&cli.project, cli.config)?;
            let pipeline = Pipeline::new(&project, config)?;
            println!("==> Checking {}", project.display());
            output::print_lines(&output::format_check(&pipeline.inventory()?));
            println!("==> Configuration is valid");
            return Ok(());
        }
        Command::Default => Task::default_task(),
        Command::Bs => Task::serve_task(),
        Command::Build => Task::build_task(),
        Command::Run { stage } => Task::Stage(stage),
    };

    let (project, config) = load_project(&cli.project, cli.config)?;
    let output_root = project.join(&config.output_root);
    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            output::print_lines(&output::format_event(&event));
        }
    });

    println!("==> {task}");
    let runner = Runner::new(Pipeline::new(&project, config)?.with_events(tx));
    let result = runner.run(&task);
    // Closes the event channel so the printer drains and exits.
    drop(runner);
    let printed = join_printer(printer);
    result?;
    printed?;

    println!("==> Done: {}", output_root.display());
    Ok(())
}

/// Wait for the printer thread. A panic there means progress output was lost.
fn join_printer(printer: JoinHandle<()>) -> Result<(), Box<dyn std::error::Error>> {
    printer
        .join()
        .map_err(|_| Box::<dyn std::error::Error>::from("progress printer thread panicked"))
}

/// Canonicalize the project directory and load its configuration.
fn load_project(
    project: &Path,
    config_file: Option<PathBuf>,
) -> Result<(PathBuf, PipelineConfig), Box<dyn std::error::Error>> {
    let project = std::fs::canonicalize(project)
        .map_err(|e| format!("project directory {}: {e}", project.display()))?;
    let config_path = match config_file {
        Some(path) if !path.is_file() => {
            return Err(format!("config file not found: {}", path.display()).into());
        }
        Some(path) => path,
        None => project.join(CONFIG_FILENAME),
    };
    let config = config::load_config_file(&config_path)?;
    Ok((project, config))
}
