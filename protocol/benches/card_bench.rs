// Codec, cipher and signing benchmarks for CardVault.
//
// The light KDF profile isolates AEAD and framing cost. The production
// profile is measured on its own in `cipher/unlock_default`.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cardvault_protocol::codec::{self, id_to_text, text_to_id, Address, CardAddress};
use cardvault_protocol::crypto::{KdfParams, KeyCipher, SecretKey, SigningAccount};
use cardvault_protocol::transaction::LegacyTransaction;

const KEY_HEX: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

fn bench_id_alphabet(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/id_alphabet");
    for id in [7u64, 1 << 32, u64::MAX] {
        let text = id_to_text(id);
        group.bench_with_input(BenchmarkId::new("to_text", id), &id, |b, &id| {
            b.iter(|| id_to_text(id));
        });
        group.bench_with_input(BenchmarkId::new("from_text", id), &text, |b, text| {
            b.iter(|| text_to_id(text).unwrap());
        });
    }
    group.finish();
}

fn bench_payload(c: &mut Criterion) {
    let address = CardAddress::from(Address::from_bytes([0xab; 20]));
    let blob = vec![0x5a; 90];
    let payload = codec::encode(&address, &blob, 4_242);

    c.bench_function("codec/encode", |b| {
        b.iter(|| codec::encode(&address, &blob, 4_242));
    });
    c.bench_function("codec/decode", |b| {
        b.iter(|| codec::decode(&payload).unwrap());
    });
}

fn bench_cipher(c: &mut Criterion) {
    let light = KeyCipher::new(KdfParams::light());
    let blob = light.encrypt(KEY_HEX, "1234").unwrap();

    c.bench_function("cipher/seal_light", |b| {
        b.iter(|| light.encrypt(KEY_HEX, "1234").unwrap());
    });
    c.bench_function("cipher/unlock_light", |b| {
        b.iter(|| light.decrypt(&blob, "1234").unwrap());
    });

    let production = KeyCipher::default();
    let blob = production.encrypt(KEY_HEX, "1234").unwrap();
    let mut group = c.benchmark_group("cipher");
    group.sample_size(10);
    group.bench_function("unlock_default", |b| {
        b.iter(|| production.decrypt(&blob, "1234").unwrap());
    });
    group.finish();
}

fn bench_signing(c: &mut Criterion) {
    let account = SigningAccount::from_secret(&SecretKey::from_hex(KEY_HEX).unwrap(), 1).unwrap();
    let tx = LegacyTransaction {
        nonce: 9,
        gas_price: 20_000_000_000,
        gas_limit: 21_000,
        to: Address::from_bytes([0x35; 20]),
        value: 1_000_000_000_000_000_000,
        data: Vec::new(),
    };

    c.bench_function("secp256k1/sign_transaction", |b| {
        b.iter(|| account.sign_transaction(&tx).unwrap());
    });

    let mut group = c.benchmark_group("secp256k1/sign_message");
    for size in [32usize, 256, 4096] {
        let message = vec![0x42; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &message, |b, message| {
            b.iter(|| account.sign_message(message).unwrap());
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_id_alphabet,
    bench_payload,
    bench_cipher,
    bench_signing,
);
criterion_main!(benches);
