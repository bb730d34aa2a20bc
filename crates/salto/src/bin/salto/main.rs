mod cli;

use salto::cache::MemCache;
use salto::config::{locate_workspace_root, WorkspaceConfig};
use salto::element::{ElemId, Element};
use salto::files::OsFiles;
use salto::parser::HclParser;
use salto::value::Value;
use salto::workspace::Workspace;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("SALTO_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Init(init_cli) => init(init_cli),
        cli::Command::Errors => errors(),
        cli::Command::Dump(dump_cli) => dump(dump_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

fn init(cli: cli::InitCommand) -> anyhow::Result<()> {
    let base_dir = std::env::current_dir()?;
    let config = salto::config::init_workspace(&OsFiles, &base_dir, cli.name.as_deref())?;
    println!("Initialised workspace `{}` ({})", config.name, config.uid);
    Ok(())
}

fn load() -> anyhow::Result<Workspace> {
    let cwd = std::env::current_dir()?;
    let root = locate_workspace_root(&OsFiles, &cwd)
        .ok_or_else(|| anyhow::anyhow!("No workspace found at or above {}", cwd.display()))?;
    let config = WorkspaceConfig::load(&OsFiles, &root)?;
    let workspace = Workspace::load(
        config,
        Box::new(HclParser),
        Box::new(OsFiles),
        Box::new(MemCache::default()),
        true,
    )?;
    Ok(workspace)
}

fn errors() -> anyhow::Result<()> {
    let workspace = load()?;
    let errors = workspace.get_workspace_errors();
    if errors.is_empty() {
        println!("No errors");
        return Ok(());
    }

    for error in &errors {
        println!("[{}] {}", error.severity, error.error);
        for fragment in &error.source_fragments {
            println!(
                "  at {}:{}:{}",
                fragment.source_range.filename,
                fragment.source_range.start.line,
                fragment.source_range.start.col
            );
            for line in fragment.fragment.lines() {
                println!("    {line}");
            }
        }
    }
    println!("{} problem(s) found", errors.len());
    Ok(())
}

fn dump(cli: cli::DumpCommand) -> anyhow::Result<()> {
    let workspace = load()?;
    let elem_id = ElemId::from_full_name(&cli.elem_id)?;
    let element = workspace
        .elements()
        .iter()
        .find(|element| element.elem_id() == &elem_id)
        .ok_or_else(|| anyhow::anyhow!("No merged element with id {elem_id}"))?;

    let value = match element {
        Element::Instance(instance) => Value::Map(instance.value.clone()),
        Element::Variable(variable) => variable.value.clone(),
        Element::Object(object) => Value::Map(object.annotations.clone()),
        Element::Primitive(primitive) => Value::Map(primitive.annotations.clone()),
    };
    output(&cli.output, &value)?;
    Ok(())
}

fn output(output: &cli::OutputArgs, value: &Value) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}

/// (salto-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let workspace = load()?;
    match cli.command {
        Blueprints => println!("{workspace:#?}"),
        Elements => println!("{:#?}", workspace.elements()),
    }

    Ok(())
}
