use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "objwire",
    about = "objwire: typed object state and remote invocation",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Read session settings from a TOML file instead of the environment
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Call the greeter through a proxy
    Greet(GreetArgs),
    /// Walk through a session: create, set, commit, call, reload
    Demo(DemoArgs),
    /// Print the effective session settings as TOML
    Config,
}

#[derive(Args)]
pub struct GreetArgs {
    /// Who to greet
    pub name: String,
    /// Which greeter object to call
    #[arg(long, default_value_t = 1)]
    pub object_id: u64,
    /// How many times to call
    #[arg(long, default_value_t = 1)]
    pub times: u32,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Greeting stored on the greeter before it is called
    #[arg(long, default_value = "Hello")]
    pub greeting: String,
    #[arg(long, default_value = "world")]
    pub name: String,
}
