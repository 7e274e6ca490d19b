use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "cardvault")]
#[command(about = "Keep a local replica of your card collections in sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local replica file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull remote changes into the local replica
    Sync {
        /// Output the sync report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List collections held in the local replica
    #[command(alias = "ls")]
    List {
        /// Sync before listing
        #[arg(long)]
        sync: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the card entries of one collection
    Cards {
        /// Collection id or unique id prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start following a collection you do not own (e.g. a public one) and sync it
    Track {
        /// Full collection id
        id: String,
    },
    /// Show how fresh the local copy of a collection is
    Status {
        /// Collection id or unique id prefix
        id: String,
    },
    /// Create a collection
    #[command(alias = "new")]
    Create {
        /// Collection title
        title: String,
        #[command(flatten)]
        fields: CollectionFields,
    },
    /// Update a collection's metadata
    Update {
        /// Collection id or unique id prefix
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: CollectionFields,
    },
    /// Delete a collection
    Delete {
        /// Collection id or unique id prefix
        id: String,
    },
    /// Set the amount of one card entry (0 removes the entry)
    SetCard {
        /// Collection id or unique id prefix
        collection: String,
        /// Card identifier
        card_id: String,
        /// Printing/variant identifier
        variant_id: String,
        /// Amount held (negative values are allowed on wantlists)
        #[arg(allow_hyphen_values = true)]
        amount: i64,
        /// Foil printing
        #[arg(long)]
        foil: bool,
        /// Card condition (e.g. NM, LP)
        #[arg(long)]
        condition: Option<String>,
        /// Card language
        #[arg(long)]
        language: Option<String>,
        /// Price per copy
        #[arg(long)]
        price: Option<f64>,
        /// Free-form note
        #[arg(long)]
        note: Option<String>,
    },
    /// Keep the replica fresh until interrupted
    Watch {
        /// Seconds between refresh checks
        #[arg(long, default_value = "30")]
        interval: u64,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

/// Metadata flags shared by `create` and `update`
#[derive(clap::Args, Debug, Default)]
pub struct CollectionFields {
    /// Collection description
    #[arg(long)]
    pub description: Option<String>,
    /// Mark as a wantlist
    #[arg(long)]
    pub wantlist: Option<bool>,
    /// Make visible to other users
    #[arg(long)]
    pub public: Option<bool>,
    /// Collection type (collection, deck, binder, trade_binder)
    #[arg(long = "type", value_name = "TYPE")]
    pub collection_type: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}
