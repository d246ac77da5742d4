//! Power failures during commit and recovery.

mod common;

use std::sync::Arc;

use ckptlog::bio::BufData;
use ckptlog::param::BSIZE;
use ckptlog::{FileSystem, MemDisk, MountOptions};

const BLOCKS: [u32; 3] = [40, 41, 42];

/// Commits one group writing `byte` to `BLOCKS`, with the power failing after
/// `budget` writes. Returns what reached the medium.
fn crash_during_commit(byte: u8, budget: usize) -> Vec<BufData> {
    let disk = Arc::new(common::formatted());
    let fs = FileSystem::mount(disk.clone(), MountOptions::new()).unwrap();
    disk.crash_after(budget);
    {
        let tx = fs.begin_tx();
        for &b in &BLOCKS {
            let mut buf = tx.read(b);
            buf.data_mut().fill(byte);
            tx.write(buf);
        }
    }
    drop(fs);
    disk.image()
}

fn reboot(image: Vec<BufData>) -> (Arc<MemDisk>, FileSystem) {
    let disk = Arc::new(MemDisk::from_image(image));
    let fs = FileSystem::mount(disk.clone(), MountOptions::new()).unwrap();
    (disk, fs)
}

fn home_holds(disk: &MemDisk, byte: u8) -> bool {
    BLOCKS.iter().all(|&b| disk.block(b) == [byte; BSIZE])
}

#[test]
fn commit_write_count() {
    let disk = Arc::new(common::formatted());
    let fs = FileSystem::mount(disk.clone(), MountOptions::new()).unwrap();
    let before = disk.writes();
    {
        let tx = fs.begin_tx();
        for &b in &BLOCKS {
            tx.bzero(b);
        }
    }
    // Log blocks, header, home blocks, erased header.
    assert_eq!(disk.writes() - before, 2 * BLOCKS.len() + 2);
}

#[test]
fn crash_before_header_loses_group() {
    for budget in 0..=BLOCKS.len() {
        let (disk, _fs) = reboot(crash_during_commit(7, budget));
        assert!(home_holds(&disk, 0), "budget {}", budget);
    }
}

#[test]
fn crash_after_header_keeps_group() {
    for budget in BLOCKS.len() + 1..=2 * BLOCKS.len() + 2 {
        let (disk, _fs) = reboot(crash_during_commit(7, budget));
        assert!(home_holds(&disk, 7), "budget {}", budget);
    }
}

#[test]
fn recovery_is_idempotent() {
    let (once, fs) = reboot(crash_during_commit(9, BLOCKS.len() + 1));
    drop(fs);
    let first = once.image();

    let (twice, fs) = reboot(first.clone());
    fs.log().recover_from_log();
    assert!(twice.image() == first);
    assert!(home_holds(&twice, 9));
}

#[test]
fn crash_during_recovery() {
    let image = crash_during_commit(5, BLOCKS.len() + 1);
    // Home blocks, erased header, cleared header.
    for budget in 0..=BLOCKS.len() + 2 {
        let disk = Arc::new(MemDisk::from_image(image.clone()));
        disk.crash_after(budget);
        drop(FileSystem::mount(disk.clone(), MountOptions::new()).unwrap());

        let (rebooted, _fs) = reboot(disk.image());
        assert!(home_holds(&rebooted, 5), "budget {}", budget);
    }
}

#[test]
fn later_group_survives_with_earlier_one() {
    let disk = Arc::new(common::formatted());
    let fs = FileSystem::mount(disk.clone(), MountOptions::new()).unwrap();
    for (i, &b) in BLOCKS.iter().enumerate() {
        let tx = fs.begin_tx();
        let mut buf = tx.read(b);
        buf.data_mut().fill(i as u8 + 1);
        tx.write(buf);
    }
    drop(fs);

    let (rebooted, _fs) = reboot(disk.image());
    for (i, &b) in BLOCKS.iter().enumerate() {
        assert!(rebooted.block(b) == [i as u8 + 1; BSIZE]);
    }
}

/// Groups committed one after another while the checkpoint task installs
/// behind them, reusing log slots.
fn run_groups(disk: &Arc<MemDisk>, groups: u32, budget: Option<usize>) {
    let fs = FileSystem::mount(disk.clone(), MountOptions::new().checkpoint(true)).unwrap();
    if let Some(budget) = budget {
        disk.crash_after(budget);
    }
    let d = fs.superblock().datastart;
    for g in 0..groups {
        let tx = fs.begin_tx();
        for i in 0..3 {
            let mut buf = tx.read(d + 3 * g + i);
            buf.data_mut().fill(g as u8 + 1);
            tx.write(buf);
        }
    }
    fs.unmount();
}

#[test]
fn crash_with_checkpointer_keeps_a_prefix_of_groups() {
    const GROUPS: u32 = 12;

    let clean = Arc::new(common::formatted());
    let mounted = clean.writes();
    run_groups(&clean, GROUPS, None);
    let total = clean.writes() - mounted;

    for budget in 0..=total {
        let disk = Arc::new(common::formatted());
        run_groups(&disk, GROUPS, Some(budget));

        let (rebooted, fs) = reboot(disk.image());
        let d = fs.superblock().datastart;
        let applied = (0..GROUPS)
            .map(|g| {
                let blocks = (0..3)
                    .map(|i| rebooted.block(d + 3 * g + i))
                    .collect::<Vec<_>>();
                let new = blocks.iter().all(|b| *b == [g as u8 + 1; BSIZE]);
                let old = blocks.iter().all(|b| *b == [0; BSIZE]);
                assert!(new || old, "budget {}: group {} torn", budget, g);
                new
            })
            .collect::<Vec<_>>();
        assert!(
            applied.windows(2).all(|w| w[0] || !w[1]),
            "budget {}: applied groups {:?} are not a prefix",
            budget,
            applied
        );
    }
}
