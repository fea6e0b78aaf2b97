use flatfs::io::FileBlockEmulatorBuilder;
use flatfs::{FileSystemBuilder, Mode, Whence};

pub fn main() {
    let tmp = tempfile::tempfile().unwrap();
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_block_count(64)
        .build()
        .expect("Could not initialize disk emulator.");

    // Mount a blank device, which formats it, and round trip a file.
    let fs = FileSystemBuilder::from(dev)
        .with_default_inodes(8)
        .mount()
        .expect("should mount");
    let fd = fs.open("hello.txt", Mode::ReadWrite).unwrap();
    fs.write(&fd, b"hello, flat world").unwrap();
    fs.seek(&fd, 7, Whence::Start).unwrap();

    let mut buf = [0; 32];
    let n = fs.read(&fd, &mut buf).unwrap();
    println!("{}", String::from_utf8_lossy(&buf[..n]));
    fs.close(&fd).unwrap();
    fs.sync().unwrap();
    println!("{} blocks free", fs.free_block_count().unwrap());
}
