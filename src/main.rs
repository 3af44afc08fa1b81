use clap::Parser;
use miette::{IntoDiagnostic, WrapErr};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::Options;

mod cli;
mod repl;

fn main() -> miette::Result<()> {
    // Install the panic handler.
    bupropion::install(bupropion::BupropionHandlerOpts::new).into_diagnostic()?;

    // Parse the command line arguments.
    let options = Options::parse();

    let level = match options.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err("cannot set up logging")?;

    if options.repl {
        return repl::run(options.capacity, !options.no_forms);
    }

    let Some(file) = options.file else {
        return Ok(());
    };

    let source = std::fs::read_to_string(&file)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot read {}", file.display()))?;

    let compiled = nisc::compile(&file.to_string_lossy(), &source, options.capacity)?;

    if options.no_forms {
        print!("{}", compiled.disassembly);
    } else {
        print!("{compiled}");
    }

    Ok(())
}
