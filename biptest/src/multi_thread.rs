#[cfg(test)]
mod tests {
    use bipbuf::BipBuffer;
    use crossbeam_utils::thread;
    use rand::Rng;
    use std::time::{Duration, Instant};

    cfg_if::cfg_if! {
        if #[cfg(feature = "short-stress")] {
            const ITERS: usize = 100_000;
        } else if #[cfg(debug_assertions)] {
            const ITERS: usize = 500_000;
        } else {
            const ITERS: usize = 2_000_000;
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(100_000);

    #[test]
    fn sanity_check() {
        let bb: BipBuffer<u32, 64> = BipBuffer::new();
        let (mut prod, mut cons) = bb.try_split().unwrap();

        let start = Instant::now();

        thread::scope(|sc| {
            sc.spawn(move |_| {
                let mut sent = 0usize;
                while sent < ITERS {
                    if start.elapsed() > TIMEOUT {
                        panic!("tx timeout, iter {}", sent);
                    }
                    let mut wgr = prod.write_reserve(16);
                    for _ in 0..wgr.capacity() {
                        wgr.push(sent as u32).unwrap();
                        sent += 1;
                        if sent == ITERS {
                            break;
                        }
                    }
                    prod.write_commit(wgr);
                }

                #[cfg(feature = "verbose")]
                println!("tx done in {:?}", start.elapsed());
            });

            sc.spawn(move |_| {
                let mut seen = 0usize;
                while seen < ITERS {
                    if start.elapsed() > TIMEOUT {
                        panic!("rx timeout, iter {}", seen);
                    }
                    let rgr = cons.read_reserve(16);
                    for &v in rgr.iter() {
                        assert_eq!(v, seen as u32, "RX iter: {}", seen);
                        seen += 1;
                    }
                    cons.read_commit(rgr);
                }

                #[cfg(feature = "verbose")]
                println!("rx done in {:?}", start.elapsed());
            });
        })
        .unwrap();
    }

    #[test]
    fn randomized_stress() {
        // An odd capacity keeps the wrap point sliding around the storage
        let bb: BipBuffer<u32, 31> = BipBuffer::new();
        let (mut prod, mut cons) = bb.try_split().unwrap();

        let start = Instant::now();

        thread::scope(|sc| {
            sc.spawn(move |_| {
                let mut rng = rand::thread_rng();
                let mut sent = 0usize;
                while sent < ITERS {
                    if start.elapsed() > TIMEOUT {
                        panic!("tx timeout, iter {}", sent);
                    }
                    let want = rng.gen_range(1..=8);
                    let mut wgr = prod.write_reserve(want);
                    for _ in 0..wgr.capacity() {
                        if sent == ITERS {
                            break;
                        }
                        wgr.push(sent as u32).unwrap();
                        sent += 1;
                    }
                    prod.write_commit(wgr);
                }
            });

            sc.spawn(move |_| {
                let mut rng = rand::thread_rng();
                let mut seen = 0usize;
                while seen < ITERS {
                    if start.elapsed() > TIMEOUT {
                        panic!("rx timeout, iter {}", seen);
                    }
                    let want = rng.gen_range(1..=8);
                    let mut rgr = cons.read_reserve(want);
                    let keep = rng.gen_range(0..=rgr.len());
                    rgr.truncate(keep);
                    for &v in rgr.iter() {
                        assert_eq!(v, seen as u32);
                        seen += 1;
                    }
                    cons.read_commit(rgr);
                }
            });
        })
        .unwrap();
    }

    #[test]
    fn boxed_payloads_cross_threads() {
        let bb: BipBuffer<Box<usize>, 16> = BipBuffer::new();
        let (mut prod, mut cons) = bb.try_split().unwrap();

        const COUNT: usize = 50_000;
        let start = Instant::now();

        thread::scope(|sc| {
            sc.spawn(move |_| {
                let mut sent = 0usize;
                while sent < COUNT {
                    if start.elapsed() > TIMEOUT {
                        panic!("tx timeout, iter {}", sent);
                    }
                    let mut wgr = prod.write_reserve(4);
                    for _ in 0..wgr.capacity() {
                        if sent == COUNT {
                            break;
                        }
                        wgr.push(Box::new(sent)).unwrap();
                        sent += 1;
                    }
                    prod.write_commit(wgr);
                }
            });

            sc.spawn(move |_| {
                let mut seen = 0usize;
                while seen < COUNT {
                    if start.elapsed() > TIMEOUT {
                        panic!("rx timeout, iter {}", seen);
                    }
                    let rgr = cons.read_reserve(4);
                    for v in rgr.iter() {
                        assert_eq!(**v, seen);
                        seen += 1;
                    }
                    cons.read_commit(rgr);
                }
            });
        })
        .unwrap();
    }
}
