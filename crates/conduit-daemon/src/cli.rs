use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "conduit", version, about = "Recurring job scheduler and import runner")]
pub struct Cli {
    /// Config file (defaults to $CONDUIT_CONFIG, then ~/.conduit/conduit.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the trigger loop and worker pool until Ctrl-C
    Serve,
    /// Put an idle job on the work queue
    EnqueueJob {
        /// Job id
        id: String,
    },
    /// Run a job now, in this process
    RunJob {
        /// Job id
        id: String,
    },
    /// Run an import now, or queue it for the workers
    RunImport {
        /// Import id
        id: String,

        /// Queue the import instead of running it here
        #[arg(long, default_value_t = false)]
        enqueue: bool,
    },
    /// Finalize an import and stop its transfer
    CancelImport {
        /// Import id
        id: String,

        /// Record the import as passed instead of failed
        #[arg(long, default_value_t = false)]
        success: bool,

        /// Message stored on the import
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List enabled jobs that are due now
    Ready,
}
