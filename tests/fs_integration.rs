//! End-to-end scenarios exercising the façade and syscall layer together
//! against an in-memory block device, rather than one module in isolation.

use std::sync::{mpsc, Arc};
use std::thread;

use pintos_fs::disk::MemDisk;
use pintos_fs::task::SimpleTask;
use pintos_fs::{FileSystem, FsError, Process, Syscalls, Task};

fn formatted(sectors: u32) -> FileSystem {
    FileSystem::format(Arc::new(MemDisk::new(sectors))).unwrap()
}

fn init_logging() {
    let _ = env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

#[test]
fn create_open_write_seek_read_roundtrip() {
    let fs = formatted(64);
    let sc = Syscalls::new(&fs);
    let p = Process::new(SimpleTask::new(1, "t"));

    sc.create(&p, "/a", 0).unwrap();
    let fd = sc.open(&p, "/a").unwrap();
    assert!(fd >= 2);

    assert_eq!(sc.write(&p, fd, b"hello").unwrap(), 5);
    sc.seek(&p, fd, 0).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(sc.read(&p, fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(sc.filesize(&p, fd).unwrap(), 5);

    sc.close(&p, fd).unwrap();
}

/// Exercises a write that lands deep in the double-indirect region, scaled
/// down from the full 8 MiB range so the backing `MemDisk` stays small: the
/// offset chosen still requires walking past the first second-level block,
/// the same code path a 4 MiB offset would take, just with fewer sectors to
/// allocate along the way.
#[test]
fn write_deep_in_double_indirect_region_reads_back() {
    const DOUBLE_INDIRECT_OFFSET: u32 = 70_656 + 5 * 65_536; // fifth second-level block
    let sectors = DOUBLE_INDIRECT_OFFSET / 512 + 64;
    let fs = formatted(sectors);
    let sc = Syscalls::new(&fs);
    let p = Process::new(SimpleTask::new(1, "t"));

    sc.create(&p, "/big", 0).unwrap();
    let fd = sc.open(&p, "/big").unwrap();

    sc.seek(&p, fd, DOUBLE_INDIRECT_OFFSET).unwrap();
    assert_eq!(sc.write(&p, fd, b"X").unwrap(), 1);
    assert_eq!(
        sc.filesize(&p, fd).unwrap(),
        DOUBLE_INDIRECT_OFFSET + 1
    );

    sc.seek(&p, fd, DOUBLE_INDIRECT_OFFSET).unwrap();
    let mut one = [0u8; 1];
    sc.read(&p, fd, &mut one).unwrap();
    assert_eq!(&one, b"X");

    // Bytes grown in between but never written read back as zero.
    sc.seek(&p, fd, DOUBLE_INDIRECT_OFFSET - 128).unwrap();
    let mut gap = [0xffu8; 4];
    sc.read(&p, fd, &mut gap).unwrap();
    assert_eq!(gap, [0u8; 4]);

    sc.close(&p, fd).unwrap();
}

#[test]
fn mkdir_chdir_relative_create_then_dotdot() {
    let fs = formatted(64);
    let sc = Syscalls::new(&fs);
    let p = Process::new(SimpleTask::new(1, "t"));

    sc.mkdir(&p, "/d").unwrap();
    sc.chdir(&p, "/d").unwrap();
    sc.create(&p, "f", 10).unwrap();
    sc.chdir(&p, "..").unwrap();

    let fd = sc.open(&p, "/d/f").unwrap();
    sc.close(&p, fd).unwrap();
    assert!(sc.open(&p, "f").is_err());
}

/// Two processes hold independent file-descriptor tables over the same
/// filesystem; fd numbers can coincide without naming the same slot, and
/// closing someone else's fd fails rather than reaching across tables.
#[test]
fn independent_processes_cannot_close_each_others_descriptors() {
    let fs = formatted(64);
    let sc = Syscalls::new(&fs);
    let p1 = Process::new(SimpleTask::new(1, "p1"));
    let p2 = Process::new(SimpleTask::new(2, "p2"));

    sc.create(&p1, "/s", 0).unwrap();
    let fd1 = sc.open(&p1, "/s").unwrap();
    assert_eq!(sc.write(&p1, fd1, b"A").unwrap(), 1);

    let fd2 = sc.open(&p2, "/s").unwrap();
    assert_eq!(fd1, fd2); // both tables hand out the same low fd independently
    sc.seek(&p2, fd2, 0).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(sc.read(&p2, fd2, &mut buf).unwrap(), 1);
    assert_eq!(&buf, b"A");

    assert_eq!(
        p2.fds.close(fd1, p2.task.id()).unwrap_err(),
        FsError::BadFileDescriptor
    );

    sc.close(&p1, fd1).unwrap();
    sc.close(&p2, fd2).unwrap();
}

/// A writer on a busy fd waits for the active reader to drain. Ordering is
/// pinned down with channels rather than sleeps: the writer only announces
/// "write observed" after `write_lock` returns, and the reader only releases
/// once told the writer is parked.
#[test]
fn writer_waits_for_active_reader_to_drain() {
    let fs = formatted(64);
    sc_shared_file_setup(&fs, "/s");

    let process = Arc::new(Process::new(SimpleTask::new(1, "t")));
    let inode = fs.open(None, "/s").unwrap();
    let fd = process
        .fds
        .install(pintos_fs::File::open(inode), "s".into(), process.task.id())
        .unwrap();

    let (reader_holding_tx, reader_holding_rx) = mpsc::channel();
    let (release_reader_tx, release_reader_rx) = mpsc::channel();
    let (order_tx, order_rx) = mpsc::channel();

    let reader_proc = Arc::clone(&process);
    let order_tx_reader = order_tx.clone();
    let reader = thread::spawn(move || {
        reader_proc
            .fds
            .with_read(fd, |_file| {
                order_tx_reader.send("reader_start").unwrap();
                reader_holding_tx.send(()).unwrap();
                release_reader_rx.recv().unwrap();
                order_tx_reader.send("reader_end").unwrap();
            })
            .unwrap();
    });

    reader_holding_rx.recv().unwrap();

    let writer_proc = Arc::clone(&process);
    let order_tx_writer = order_tx;
    let writer = thread::spawn(move || {
        writer_proc
            .fds
            .with_write(fd, |_file| {
                order_tx_writer.send("writer_acquired").unwrap();
            })
            .unwrap();
    });

    // Give the writer a moment to be parked behind the still-held read lock
    // before letting the reader proceed.
    thread::sleep(std::time::Duration::from_millis(50));
    release_reader_tx.send(()).unwrap();

    reader.join().unwrap();
    writer.join().unwrap();

    let order: Vec<_> = order_rx.try_iter().collect();
    assert_eq!(order, vec!["reader_start", "reader_end", "writer_acquired"]);

    process.fds.close(fd, process.task.id()).unwrap().close(&fs);
}

fn sc_shared_file_setup(fs: &FileSystem, path: &str) {
    fs.create(None, path, 0).unwrap();
}

/// Fills the device by creating distinct zero-length files until the
/// free-map is exhausted, then confirms removing one makes room for exactly
/// one more.
#[test]
fn filling_the_device_then_freeing_one_slot() {
    init_logging();
    let fs = formatted(16);
    let mut created = Vec::new();
    loop {
        let name = format!("/f{}", created.len());
        match fs.create(None, &name, 0) {
            Ok(()) => created.push(name),
            Err(FsError::NoSpace) => break,
            Err(e) => panic!("unexpected error while filling device: {e:?}"),
        }
    }
    assert!(!created.is_empty());
    assert_eq!(fs.create(None, "/overflow", 0), Err(FsError::NoSpace));

    fs.remove(None, &created[0]).unwrap();
    fs.create(None, "/overflow", 0).unwrap();
}

/// Round-trips random content at a handful of offsets within the
/// direct/single-indirect range, using `rand` the way the pack's own
/// filesystem test tooling generates fuzz-style content.
#[test]
fn random_content_roundtrips_at_scattered_offsets() {
    use rand::Rng;

    let fs = formatted(256);
    fs.create(None, "/r", 0).unwrap();
    let handle = fs.open(None, "/r").unwrap();

    let mut rng = rand::thread_rng();
    let offsets = [0u32, 512, 5119, 5120, 40_000];
    for &off in &offsets {
        let len = rng.gen_range(1..=64);
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        pintos_fs::inode::write_at(&fs, &handle, &data, off).unwrap();
        let mut readback = vec![0u8; len];
        pintos_fs::inode::read_at(&fs, &handle, &mut readback, off);
        assert_eq!(readback, data, "mismatch at offset {off}");
    }

    pintos_fs::inode::close(&fs, handle);
}
