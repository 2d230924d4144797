//! Walnut - an encrypted single-file volume.
//!
//! Stores a directory tree of files inside one host file, with file
//! content encrypted under a secret.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use walnut::config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_INITIAL_BLOCKS, DEFAULT_INODE_CAPACITY, DEFAULT_MAX_BLOCKS,
};
use walnut::vfs::{InodeKind, VolumeInfo};
use walnut::{Volume, VolumeConfig};

#[derive(Parser)]
#[command(name = "walnut")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Encrypted single-file virtual file system",
    long_about = "Stores files and directories inside one host file. File content, directories and extent lists are encrypted with a key table derived from SECRET; volume metadata is readable without it."
)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new volume file
    Init {
        /// Volume file to create (must not exist)
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,

        /// Block size in bytes
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u32,

        /// Requested initial size in blocks
        #[arg(long, default_value_t = DEFAULT_INITIAL_BLOCKS)]
        initial_blocks: u32,

        /// Number of inode slots
        #[arg(long, default_value_t = DEFAULT_INODE_CAPACITY)]
        inode_capacity: u32,

        /// Largest size the volume may grow to, in blocks
        #[arg(long, default_value_t = DEFAULT_MAX_BLOCKS)]
        max_blocks: u32,
    },

    /// Copy a host file into the volume
    Add {
        /// Volume file
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,

        /// Host file to copy in
        from_path: PathBuf,

        /// Volume directory to add to
        path: String,

        /// Name of the new file
        filename: String,

        /// Replace the file if it already exists
        #[arg(long)]
        force: bool,
    },

    /// Copy a file out of the volume to the host
    Export {
        /// Volume file
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,

        /// Volume directory holding the file
        path: String,

        /// Name of the file
        filename: String,

        /// Host file to write
        export_path: PathBuf,
    },

    /// Create a directory in the volume
    Mkdir {
        /// Volume file
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,

        /// Directory to create
        path: String,

        /// Create missing parent directories
        #[arg(short, long)]
        parents: bool,
    },

    /// List a volume directory
    Ls {
        /// Volume file
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,

        /// Directory to list
        #[arg(default_value = "/")]
        path: String,
    },

    /// List every directory in the volume
    Lsdir {
        /// Volume file
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,
    },

    /// Delete a file from the volume
    Rm {
        /// Volume file
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,

        /// Volume directory holding the file
        path: String,

        /// Name of the file
        filename: String,
    },

    /// Write a file's content to stdout
    Cat {
        /// Volume file
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,

        /// Volume directory holding the file
        path: String,

        /// Name of the file
        filename: String,
    },

    /// Show metadata of a file or directory
    Stat {
        /// Volume file
        fs_path: PathBuf,

        /// Volume secret ("-" to prompt)
        secret: String,

        /// Volume directory holding the entry
        path: String,

        /// Name of the entry
        filename: String,
    },

    /// Show volume geometry and usage (no secret needed)
    Info {
        /// Volume file
        fs_path: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    match cli.command {
        Commands::Init {
            fs_path,
            secret,
            block_size,
            initial_blocks,
            inode_capacity,
            max_blocks,
        } => {
            let config = VolumeConfig::new(block_size, initial_blocks, inode_capacity, max_blocks);
            cmd_init(&fs_path, &secret, config)
        }

        Commands::Add {
            fs_path,
            secret,
            from_path,
            path,
            filename,
            force,
        } => cmd_add(&fs_path, &secret, &from_path, &path, &filename, force),

        Commands::Export {
            fs_path,
            secret,
            path,
            filename,
            export_path,
        } => cmd_export(&fs_path, &secret, &path, &filename, &export_path),

        Commands::Mkdir {
            fs_path,
            secret,
            path,
            parents,
        } => cmd_mkdir(&fs_path, &secret, &path, parents),

        Commands::Ls {
            fs_path,
            secret,
            path,
        } => cmd_ls(&fs_path, &secret, &path),

        Commands::Lsdir { fs_path, secret } => cmd_lsdir(&fs_path, &secret),

        Commands::Rm {
            fs_path,
            secret,
            path,
            filename,
        } => cmd_rm(&fs_path, &secret, &path, &filename),

        Commands::Cat {
            fs_path,
            secret,
            path,
            filename,
        } => cmd_cat(&fs_path, &secret, &path, &filename),

        Commands::Stat {
            fs_path,
            secret,
            path,
            filename,
        } => cmd_stat(&fs_path, &secret, &path, &filename),

        Commands::Info { fs_path, json } => cmd_info(&fs_path, json),
    }
}

/// Resolve a SECRET argument, prompting when it is "-".
fn read_secret(secret: &str, confirm: bool) -> anyhow::Result<String> {
    if secret != "-" {
        return Ok(secret.to_string());
    }
    let entered = rpassword::prompt_password("Secret: ").context("Failed to read secret")?;
    if confirm {
        let again =
            rpassword::prompt_password("Confirm secret: ").context("Failed to read secret")?;
        if again != entered {
            bail!("Secrets do not match");
        }
    }
    Ok(entered)
}

fn open(fs_path: &Path, secret: &str) -> anyhow::Result<Volume> {
    let secret = read_secret(secret, false)?;
    let volume = Volume::open(fs_path, &secret)
        .with_context(|| format!("Failed to open volume {}", fs_path.display()))?;
    Ok(volume)
}

fn cmd_init(fs_path: &Path, secret: &str, config: VolumeConfig) -> anyhow::Result<()> {
    let secret = read_secret(secret, true)?;
    let volume = Volume::init(fs_path, &secret, config)?;
    let info = volume.info();

    println!("Volume initialized: {}", fs_path.display());
    println!("  Block size:     {} bytes", info.block_size);
    println!("  Blocks:         {} ({} free)", info.total_blocks, info.free_blocks);
    println!("  Max blocks:     {}", info.max_blocks);
    println!("  Inode capacity: {}", info.inode_capacity);

    Ok(())
}

fn cmd_add(
    fs_path: &Path,
    secret: &str,
    from_path: &Path,
    path: &str,
    filename: &str,
    force: bool,
) -> anyhow::Result<()> {
    let data = std::fs::read(from_path)
        .with_context(|| format!("Failed to read {}", from_path.display()))?;
    let mut volume = open(fs_path, secret)?;

    let inode = if force {
        volume.put(path, filename, &data)?
    } else {
        volume.add(path, filename, &data)?
    };
    println!(
        "Added {} bytes as {} (inode {})",
        data.len(),
        join_display(path, filename),
        inode
    );

    Ok(())
}

fn cmd_export(
    fs_path: &Path,
    secret: &str,
    path: &str,
    filename: &str,
    export_path: &Path,
) -> anyhow::Result<()> {
    let volume = open(fs_path, secret)?;
    let data = volume.export(path, filename)?;

    std::fs::write(export_path, &data)
        .with_context(|| format!("Failed to write {}", export_path.display()))?;
    println!("Wrote {} bytes to {}", data.len(), export_path.display());

    Ok(())
}

fn cmd_mkdir(fs_path: &Path, secret: &str, path: &str, parents: bool) -> anyhow::Result<()> {
    let mut volume = open(fs_path, secret)?;

    if parents {
        volume.create_dir_all(path)?;
    } else {
        volume.mkdir(path)?;
    }
    println!("Created directory {}", path);

    Ok(())
}

fn cmd_ls(fs_path: &Path, secret: &str, path: &str) -> anyhow::Result<()> {
    let volume = open(fs_path, secret)?;
    let entries = volume.list(path)?;

    if entries.is_empty() {
        println!("(empty)");
    } else {
        for entry in entries {
            let stat = volume.stat_inode(entry.inode)?;
            let type_char = if entry.is_dir() { 'd' } else { '-' };
            let size = if entry.is_dir() {
                "-".to_string()
            } else {
                format!("{}", stat.size)
            };
            println!("{} {:>10}  {}", type_char, size, entry.name);
        }
    }

    Ok(())
}

fn cmd_lsdir(fs_path: &Path, secret: &str) -> anyhow::Result<()> {
    let volume = open(fs_path, secret)?;

    for path in volume.directories()? {
        println!("{}", path);
    }

    Ok(())
}

fn cmd_rm(fs_path: &Path, secret: &str, path: &str, filename: &str) -> anyhow::Result<()> {
    let mut volume = open(fs_path, secret)?;

    volume.remove(path, filename)?;
    println!("Deleted {}", join_display(path, filename));

    Ok(())
}

fn cmd_cat(fs_path: &Path, secret: &str, path: &str, filename: &str) -> anyhow::Result<()> {
    let volume = open(fs_path, secret)?;
    let data = volume.export(path, filename)?;

    let mut stdout = io::stdout().lock();
    stdout.write_all(&data).context("Failed to write to stdout")?;
    stdout.flush().context("Failed to write to stdout")?;

    Ok(())
}

fn cmd_stat(fs_path: &Path, secret: &str, path: &str, filename: &str) -> anyhow::Result<()> {
    let volume = open(fs_path, secret)?;
    let stat = volume.stat(path, filename)?;

    let kind = match stat.kind {
        InodeKind::File => "file",
        InodeKind::Directory => "directory",
    };
    println!("Path:     {}", join_display(path, filename));
    println!("Type:     {}", kind);
    println!("Inode:    {}", stat.inode);
    println!("Size:     {} bytes", stat.size);
    println!("Blocks:   {} in {} extent(s)", stat.blocks, stat.extents);
    println!("Created:  {}", stat.created);
    println!("Modified: {}", stat.modified);

    Ok(())
}

fn cmd_info(fs_path: &Path, json: bool) -> anyhow::Result<()> {
    let info = Volume::inspect(fs_path)
        .with_context(|| format!("Failed to read volume {}", fs_path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }

    Ok(())
}

fn print_info(info: &VolumeInfo) {
    let used = info.total_blocks - info.free_blocks;

    println!("Walnut Volume Information");
    println!("=========================");
    println!("Volume file:      {}", info.path.display());
    println!("Format version:   {}", info.version);
    println!("Block size:       {} bytes", info.block_size);
    println!();
    println!("Capacity:");
    println!("  Size:           {} bytes", info.volume_bytes);
    println!("  Blocks:         {} / max {}", info.total_blocks, info.max_blocks);
    println!("  Used:           {} blocks", used);
    println!("  Free:           {} blocks", info.free_blocks);
    println!();
    println!("Contents:");
    println!("  Inodes:         {} / {}", info.inode_count, info.inode_capacity);
    println!("  Directories:    {}", info.dir_count);
    println!("  Files:          {}", info.file_count);
}

fn join_display(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
