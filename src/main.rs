use std::io::Write;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};

use flatfs::storage::FileBackedDevice;
use flatfs::{path, Directory, File, Filesystem, OpenMode};

#[derive(Parser)]
#[command(about = "Inode-based filesystem inside a single flat storage image")]
struct Args {
    /// Filesystem image file
    image: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an image file and lay out a fresh filesystem on it
    Format {
        /// Image size in bytes
        #[arg(long)]
        size: u64,
        /// Number of inode slots
        #[arg(long, default_value_t = 1024)]
        inodes: u32,
        /// Block size in KiB (1, 2, 4 or 8)
        #[arg(long, default_value_t = 1)]
        block_size_kb: u16,
    },
    /// Print superblock statistics
    Info,
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        dir: String,
    },
    /// Create a directory
    Mkdir { dir: String },
    /// Write a file's contents to stdout
    Cat { file: String },
    /// Copy a local file into the image
    Put { file: String, source: PathBuf },
    /// Delete a file or directory tree
    Rm { target: String },
    /// Rename an entry within a directory
    Mv { dir: String, old: String, new: String },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let image = args.image;

    let open_fs = || -> Result<Filesystem<FileBackedDevice>> {
        let device = FileBackedDevice::open(&image)
            .context("unable to open image file in read-write mode")?;
        Ok(Filesystem::new(device)?)
    };

    match args.command {
        Command::Format {
            size,
            inodes,
            block_size_kb,
        } => {
            let device = FileBackedDevice::create(&image, size)
                .context("unable to create image file")?;
            Filesystem::new(device)?.format(inodes, block_size_kb)?;
            println!("formatted {}", image.display());
        }

        Command::Info => {
            let fs = open_fs()?;
            let sb = fs.superblock();
            println!(
                "inodes: {} of {} allocated",
                sb.inode_allocated, sb.inode_capacity
            );
            println!(
                "blocks: {} of {} allocated, {} preserved, {} bytes each",
                sb.block_allocated, sb.block_capacity, sb.block_preserved, sb.block_size
            );
        }

        Command::Ls { dir } => {
            let mut fs = open_fs()?;
            let dir = Directory::open(&mut fs, &dir)?;
            for entry in dir.list(&mut fs)? {
                let kind = if entry.is_directory { 'd' } else { '-' };
                println!(
                    "{kind} {:>10} inode {:>5}  {}",
                    entry.size, entry.inode_index, entry.name
                );
            }
        }

        Command::Mkdir { dir } => {
            let mut fs = open_fs()?;
            let name = path::file_name(dir.trim_end_matches('/'))?.to_owned();
            let parent = path::parent_directory(dir.trim_end_matches('/'))?.to_owned();
            Directory::open(&mut fs, &parent)?.create_directory(&mut fs, &name)?;
        }

        Command::Cat { file } => {
            let mut fs = open_fs()?;
            let mut file = File::open(&mut fs, &file, OpenMode::Open)?;
            let contents = file.read_to_end(&fs)?;
            std::io::stdout().write_all(&contents)?;
        }

        Command::Put { file, source } => {
            let data = std::fs::read(&source)
                .with_context(|| format!("unable to read {}", source.display()))?;
            ensure!(
                u32::try_from(data.len()).is_ok(),
                "source exceeds the 4 GiB file size limit"
            );

            let mut fs = open_fs()?;
            let mut file = File::open(&mut fs, &file, OpenMode::Create)?;
            file.write(&mut fs, &data)?;
        }

        Command::Rm { target } => {
            let mut fs = open_fs()?;
            let name = path::file_name(target.trim_end_matches('/'))?.to_owned();
            let parent = path::parent_directory(target.trim_end_matches('/'))?.to_owned();
            Directory::open(&mut fs, &parent)?.delete(&mut fs, &name)?;
        }

        Command::Mv { dir, old, new } => {
            let mut fs = open_fs()?;
            Directory::open(&mut fs, &dir)?.rename(&mut fs, &old, &new)?;
        }
    }
    Ok(())
}
