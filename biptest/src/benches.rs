use bipbuf::BipBuffer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::cmp::min;

const DATA_SZ: usize = 1024 * 1024;

fn chunky(data: &[u32], chunksz: usize) {
    let buffy: BipBuffer<u32, 4096> = BipBuffer::new();
    let (mut prod, mut cons) = buffy.try_split().unwrap();

    crossbeam::thread::scope(|sc| {
        sc.spawn(|_| {
            data.chunks(chunksz).for_each(|ch| {
                let mut st = 0;
                while st < ch.len() {
                    let mut wgr = prod.write_reserve(ch.len() - st);
                    let n = wgr.extend_from_slice(&ch[st..]);
                    prod.write_commit(wgr);
                    st += n;
                }
            });
        });

        sc.spawn(|_| {
            data.chunks(chunksz).for_each(|ch| {
                let mut st = 0;
                while st < ch.len() {
                    let rgr = cons.read_reserve(ch.len() - st);
                    let len = min(ch.len() - st, rgr.len());
                    assert_eq!(ch[st..st + len], rgr[..len]);
                    cons.read_commit(rgr);
                    st += len;
                }
            });
        });
    })
    .unwrap();
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let data: Vec<u32> = (0..DATA_SZ as u32).collect();

    c.bench_function("bip 128/4096", |bench| {
        bench.iter(|| chunky(black_box(&data), 128))
    });

    c.bench_function("bip 512/4096", |bench| {
        bench.iter(|| chunky(black_box(&data), 512))
    });

    c.bench_function("bip 2048/4096", |bench| {
        bench.iter(|| chunky(black_box(&data), 2048))
    });

    c.bench_function("std channels 1024 unbounded", |bench| {
        bench.iter(|| {
            use std::sync::mpsc::channel;

            let (tx, rx) = channel::<Vec<u32>>();
            let rdata = &data;

            crossbeam::thread::scope(|sc| {
                sc.spawn(move |_| {
                    rdata.chunks(1024).for_each(|ch| tx.send(ch.to_vec()).unwrap());
                });

                sc.spawn(move |_| {
                    rdata.chunks(1024).for_each(|ch| {
                        let x = rx.recv().unwrap();
                        assert_eq!(&x[..], ch);
                    });
                });
            })
            .unwrap();
        })
    });

    c.bench_function("heapless spsc by element", |bench| {
        bench.iter(|| {
            let mut queue: heapless::spsc::Queue<u32, 4096> = heapless::spsc::Queue::new();
            let (mut tx, mut rx) = queue.split();
            let rdata = &data;

            crossbeam::thread::scope(|sc| {
                sc.spawn(move |_| {
                    for &v in rdata.iter() {
                        while tx.enqueue(v).is_err() {}
                    }
                });

                sc.spawn(move |_| {
                    for &v in rdata.iter() {
                        loop {
                            if let Some(got) = rx.dequeue() {
                                assert_eq!(got, v);
                                break;
                            }
                        }
                    }
                });
            })
            .unwrap();
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
