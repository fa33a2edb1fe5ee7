// Ledger core benchmarks for the Meridian protocol.
//
// Covers Merkle root construction at several leaf counts, sealing an entry
// block, decoding a sealed directory block, and closing a full directory
// height through the ledger.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use meridian_protocol::block::{
    chain_id_from_name, create_block, BlockContext, ChainBlock, DirectoryBlock, Entry, EntryBlock,
};
use meridian_protocol::chain::Ledger;
use meridian_protocol::codec::BinaryCodec;
use meridian_protocol::config::NETWORK_ID_LOCALNET;
use meridian_protocol::crypto::hash::{sha256, Digest};
use meridian_protocol::crypto::merkle::merkle_root;

fn leaves(n: usize) -> Vec<Digest> {
    (0..n as u32).map(|i| sha256(&i.to_be_bytes())).collect()
}

fn entries_for(chain_id: Digest, n: usize) -> Vec<Entry> {
    (0..n as u32)
        .map(|i| Entry::new(chain_id, vec![i.to_be_bytes().to_vec()], vec![0xAB; 256]).unwrap())
        .collect()
}

fn bench_merkle_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle/root");

    for size in [2usize, 64, 1024, 16_384] {
        let input = leaves(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| merkle_root(input));
        });
    }

    group.finish();
}

fn bench_entry_block_seal(c: &mut Criterion) {
    let chain_id = chain_id_from_name(&[b"bench"]);
    let ctx = BlockContext::new(NETWORK_ID_LOCALNET, 0, 1_700_000_000);
    let mut group = c.benchmark_group("entry_block/append_and_seal");

    for size in [16usize, 256, 4096] {
        let entries = entries_for(chain_id, size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &entries, |b, entries| {
            b.iter(|| {
                let mut block: EntryBlock =
                    create_block(chain_id, 0, None, &ctx, entries.len()).unwrap();
                for entry in entries {
                    block.append(entry).unwrap();
                }
                block.seal().unwrap();
                block.key_merkle_root()
            });
        });
    }

    group.finish();
}

fn bench_directory_decode(c: &mut Criterion) {
    let ledger = Ledger::new(NETWORK_ID_LOCALNET, 0).unwrap();
    for i in 0..256u32 {
        let name = format!("chain-{i}");
        let chain_id = chain_id_from_name(&[name.as_bytes()]);
        ledger
            .create_chain(Entry::new(chain_id, vec![name.into_bytes()], vec![]).unwrap())
            .unwrap();
    }
    let sealed = ledger.close_directory_block().unwrap();
    let encoded = sealed.directory.encode();

    c.bench_function("directory_block/decode_258_slots", |b| {
        b.iter(|| DirectoryBlock::decode(&encoded).unwrap());
    });
}

fn bench_close_height(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/close_height");

    for chains in [1usize, 32, 256] {
        group.throughput(Throughput::Elements(chains as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chains), &chains, |b, &chains| {
            b.iter_batched(
                || {
                    let ledger = Ledger::new(NETWORK_ID_LOCALNET, 0).unwrap();
                    for i in 0..chains {
                        let name = format!("chain-{i}");
                        let chain_id = chain_id_from_name(&[name.as_bytes()]);
                        for entry in entries_for(chain_id, 8) {
                            if ledger.entry_chain(&chain_id).is_none() {
                                ledger.create_chain(entry).unwrap();
                            } else {
                                ledger.submit_entry(entry).unwrap();
                            }
                        }
                    }
                    ledger
                },
                |ledger| ledger.close_directory_block().unwrap(),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_merkle_root,
    bench_entry_block_seal,
    bench_directory_decode,
    bench_close_height,
);
criterion_main!(benches);
