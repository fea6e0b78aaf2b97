mod cli;

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use clap::Parser;
use cli::{Cli, Command};
use flatfs::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
use flatfs::{FileSystem, FileSystemBuilder, Mode, BLOCK_SIZE};
use log::info;

type Result<T> = std::result::Result<T, Box<dyn Error>>;

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Format { blocks, inodes } => format(&cli.image, blocks, inodes),
        Command::Put { files } => {
            let fs = attach(&cli.image)?;
            for path in files.iter() {
                put(&fs, path)?;
            }
            fs.sync()?;
            Ok(())
        }
        Command::Get { name, output } => {
            let fs = attach(&cli.image)?;
            let data = get(&fs, &name)?;
            match output {
                Some(path) => fs::write(path, data)?,
                None => io::stdout().write_all(&data)?,
            }
            Ok(())
        }
        Command::Ls => {
            let fs = attach(&cli.image)?;
            for name in fs.list()? {
                let fd = fs.open(&name, Mode::Read)?;
                let size = fs.file_size(&fd)?;
                fs.close(&fd)?;
                println!("{:>8} {}", size, name);
            }
            println!("{} blocks free", fs.free_block_count()?);
            Ok(())
        }
        Command::Rm { names } => {
            let fs = attach(&cli.image)?;
            for name in names.iter() {
                if !fs.delete(name)? {
                    eprintln!("{}: no such file", name);
                }
            }
            fs.sync()?;
            Ok(())
        }
    }
}

fn format(image: &Path, blocks: usize, inodes: u32) -> Result<()> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image)?;
    let dev = FileBlockEmulatorBuilder::from(fd)
        .with_block_count(blocks)
        .build()?;
    let fs = FileSystemBuilder::from(dev)
        .with_default_inodes(inodes)
        .mount()?;
    fs.sync()?;
    info!("created {:?} with {} blocks", image, blocks);
    Ok(())
}

/// Mounts an existing image, sized by its length on the host.
fn attach(image: &Path) -> Result<FileSystem<FileBlockEmulator>> {
    let blocks = fs::metadata(image)?.len() as usize / BLOCK_SIZE;
    let dev = FileBlockEmulator::open_disk(image, blocks)?;
    Ok(FileSystem::mount(dev)?)
}

fn put(fs: &FileSystem<FileBlockEmulator>, path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("{:?} has no usable file name", path))?;
    let data = fs::read(path)?;

    // Writes never shrink a file.
    fs.delete(name)?;
    let fd = fs.open(name, Mode::Write)?;
    let written = fs.write(&fd, &data);
    fs.close(&fd)?;
    let written = written?;
    if written < data.len() {
        return Err(format!("{}: only {} of {} bytes fit", name, written, data.len()).into());
    }
    println!("{} ({} bytes)", name, written);
    Ok(())
}

fn get(fs: &FileSystem<FileBlockEmulator>, name: &str) -> Result<Vec<u8>> {
    let fd = fs.open(name, Mode::Read)?;
    let mut data = vec![0; fs.file_size(&fd)? as usize];
    let read = fs.read(&fd, &mut data);
    fs.close(&fd)?;
    data.truncate(read?);
    Ok(data)
}
