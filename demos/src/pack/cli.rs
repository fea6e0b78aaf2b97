use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Disk image holding the volume
    #[arg(long, short)]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a blank image and format it
    Format {
        /// Number of 512 byte blocks in the image
        #[arg(long, short, default_value_t = 1024)]
        blocks: usize,

        /// Number of inodes, which bounds the number of files
        #[arg(long, short = 'n', default_value_t = flatfs::DEFAULT_INODE_COUNT)]
        inodes: u32,
    },
    /// Copy host files into the volume
    Put {
        /// Host files, stored under their file names
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Copy a file out of the volume
    Get {
        name: String,

        /// Destination on the host, stdout if omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// List files with their sizes
    Ls,
    /// Delete files from the volume
    Rm {
        #[arg(required = true)]
        names: Vec<String>,
    },
}
