use byteorder::{ByteOrder, NativeEndian};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use gptpnet::net::socket::{ControlMessage, ReceivedMessage, SO_TIMESTAMPING};
use gptpnet::net::timestamp::{capture_rx, from_timestamping};
use gptpnet::net::{SendPacer, netlink};
use gptpnet::protocol::EthHeader;
use gptpnet::protocol::message::HeaderFields;

fn timestamping_record() -> Vec<u8> {
    let mut data = Vec::new();
    for (sec, nsec) in [(0i64, 0i64), (1_700_000_000, 123_456_789), (0, 0)] {
        data.extend_from_slice(&(sec as libc::time_t).to_ne_bytes());
        data.extend_from_slice(&(nsec as libc::c_long).to_ne_bytes());
    }
    data
}

fn sync_frame() -> Vec<u8> {
    let mut frame = EthHeader::gptp([0x02, 0, 0, 0, 0, 1]).encode().to_vec();
    let mut msg = vec![0u8; 44];
    HeaderFields {
        msgtype: 0,
        domain: 0,
        sequence_id: 1,
    }
    .encode_into(&mut msg);
    frame.extend(msg);
    frame
}

fn newlink_batch(count: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    for i in 0..count {
        let name = format!("eth{i}");
        let rta_len = 4 + name.len() + 1;
        let attr_len = (rta_len + 3) & !3;
        let len = 16 + 16 + attr_len;
        let mut msg = vec![0u8; len];
        NativeEndian::write_u32(&mut msg[0..4], len as u32);
        NativeEndian::write_u16(&mut msg[4..6], 16);
        NativeEndian::write_i32(&mut msg[20..24], i as i32 + 1);
        NativeEndian::write_u32(&mut msg[24..28], 0x41);
        NativeEndian::write_u16(&mut msg[32..34], rta_len as u16);
        NativeEndian::write_u16(&mut msg[34..36], 3);
        msg[36..36 + name.len()].copy_from_slice(name.as_bytes());
        buf.extend(msg);
    }
    buf
}

fn timestamp_benchmark(c: &mut Criterion) {
    let record = timestamping_record();
    c.bench_function("timestamping_extract", |b| {
        b.iter(|| from_timestamping(black_box(&record)).unwrap())
    });

    let frame = sync_frame();
    let msg = ReceivedMessage {
        len: frame.len(),
        flags: 0,
        control: vec![ControlMessage {
            level: libc::SOL_SOCKET,
            kind: SO_TIMESTAMPING,
            data: record.clone(),
        }],
    };
    c.bench_function("rx_capture_sync", |b| {
        b.iter(|| capture_rx(black_box(&frame), black_box(&msg)).unwrap())
    });
}

fn netlink_benchmark(c: &mut Criterion) {
    let batch = newlink_batch(16);
    c.bench_function("netlink_parse_16_links", |b| {
        b.iter(|| netlink::parse_messages(black_box(&batch)).unwrap())
    });
}

fn pacer_benchmark(c: &mut Criterion) {
    c.bench_function("pacer_send_cycle", |b| {
        let mut pacer = SendPacer::new(300_000, 20_000_000);
        let mut now = 0i64;
        b.iter(|| {
            now += 1_000_000;
            if pacer.check(now, 0).is_ok() {
                pacer.on_sent(now, 0);
                pacer.on_tx_timestamp();
            }
        })
    });
}

criterion_group!(benches, timestamp_benchmark, netlink_benchmark, pacer_benchmark);
criterion_main!(benches);
