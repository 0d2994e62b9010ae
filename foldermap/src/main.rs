use colored::Colorize;
use foldermap::command_argument_builder;
use foldermap::handlers::{handle_run, handle_serve, handle_tree};
use foldermap::logging::init_logging;
use foldermap_core::print_banner;

#[tokio::main]
async fn main() {
    let chosen_command = command_argument_builder().get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // JSON output must stay parseable
    let json_output = matches!(
        chosen_command.subcommand(),
        Some(("tree", sub_matches)) if sub_matches.get_flag("json")
    );
    if !quiet && !json_output {
        print_banner();
    }

    let Some((name, sub_matches)) = chosen_command.subcommand() else {
        return;
    };
    init_logging(sub_matches.get_flag("verbose"));

    let result = match name {
        "run" => handle_run(sub_matches, quiet).await,
        "tree" => handle_tree(sub_matches, quiet).await,
        "serve" => handle_serve(sub_matches).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".bright_red().bold(), e);
        std::process::exit(1);
    }
}
