use crate::CLAP_STYLING;
use clap::builder::BoolishValueParser;
use clap::{Arg, ArgAction, arg, command};

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("foldermap")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("foldermap")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("run")
                .about("Fetches the folder hierarchy, saves it and fires the trigger once")
                .args(fetch_args())
                .args(run_args())
                .arg(
                    arg!(--"payload" <DATA>)
                        .required(false)
                        .help("Event payload that caused this run. Accepted and ignored"),
                ),
        )
        .subcommand(
            command!("tree")
                .about("Fetches and prints the folder hierarchy without saving anything")
                .args(fetch_args())
                .arg(
                    arg!(--"json")
                        .required(false)
                        .help("Print the flattened records as JSON instead of a tree"),
                ),
        )
        .subcommand(
            command!("serve")
                .about("Serves an HTTP endpoint that performs one run per POST")
                .args(fetch_args())
                .args(run_args())
                .arg(
                    arg!(-p --"port" <PORT>)
                        .required(false)
                        .env("PORT")
                        .help("Port to listen on")
                        .value_parser(clap::value_parser!(u16))
                        .default_value("8080"),
                ),
        )
}

/// Settings shared by every subcommand that walks the hierarchy.
fn fetch_args() -> Vec<Arg> {
    vec![
        arg!(-r --"root" <ID>)
            .required(false)
            .env("ROOT")
            .help("Root folder or organization, e.g. folders/123, organizations/1 or 123"),
        arg!(-d --"max-depth" <DEPTH>)
            .required(false)
            .env("MAX_DEPTH")
            .help("Number of levels below the root to descend [default: 4]"),
        arg!(--"fan-out" <NUM>)
            .required(false)
            .env("FAN_OUT")
            .help("Maximum concurrent listing requests [default: 8]"),
        arg!(-v --"verbose")
            .required(false)
            .env("VERBOSE")
            .action(ArgAction::SetTrue)
            .value_parser(BoolishValueParser::new())
            .help("Log every node and raise foldermap logging to debug"),
        arg!(--"access-token" <TOKEN>)
            .required(false)
            .env("ACCESS_TOKEN")
            .hide_env_values(true)
            .help("OAuth access token. Defaults to the instance metadata server"),
        arg!(--"resource-manager-url" <URL>)
            .required(false)
            .env("RESOURCE_MANAGER_URL")
            .hide(true),
    ]
}

/// Settings only needed when records are saved and the trigger is fired.
fn run_args() -> Vec<Arg> {
    vec![
        arg!(--"dataset" <DATASET>)
            .required(false)
            .env("DATASET")
            .help("Destination dataset"),
        arg!(--"table" <TABLE>)
            .required(false)
            .env("TABLE")
            .help("Destination table [default: folders]"),
        arg!(--"project" <PROJECT>)
            .required(false)
            .env("PROJECT")
            .help("Project that owns the dataset and short topic names"),
        arg!(--"parent" <TRANSFER_CONFIG>)
            .required(false)
            .env("PARENT")
            .help("Transfer configuration to start a manual run of after saving"),
        arg!(--"topic" <TOPIC>)
            .required(false)
            .env("TOPIC")
            .help("Topic to publish a completion message to after saving"),
        arg!(--"sink" <SINK>)
            .required(false)
            .env("SINK")
            .help("Where records go: `bigquery` or `sqlite:<path>` [default: bigquery]"),
        arg!(--"sqlite" <PATH>)
            .required(false)
            .help("Shorthand for --sink sqlite:<PATH>. Takes precedence over --sink"),
        arg!(--"timeout-secs" <SECS>)
            .required(false)
            .env("TIMEOUT_SECS")
            .help("Deadline for one whole run [default: 540]"),
        arg!(--"bigquery-url" <URL>)
            .required(false)
            .env("BIGQUERY_URL")
            .hide(true),
        arg!(--"data-transfer-url" <URL>)
            .required(false)
            .env("DATA_TRANSFER_URL")
            .hide(true),
        arg!(--"pubsub-url" <URL>)
            .required(false)
            .env("PUBSUB_URL")
            .hide(true),
    ]
}
