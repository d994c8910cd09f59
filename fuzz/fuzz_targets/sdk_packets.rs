#![no_main]

use std::net::SocketAddr;

use libfuzzer_sys::fuzz_target;
use wire::framing::{advanced_packet_filter, basic_packet_filter, unwrap_sdk5};
use wire::{
    packet_type, read_message, read_packet_unverified, MatchDataRequestPacket, PacketType,
    RelayUpdateRequest, ServerInitRequestPacket, ServerUpdatePacket, SessionUpdatePacket,
};

fuzz_target!(|data: &[u8]| {
    let from = SocketAddr::from(([10, 0, 0, 1], 50000));
    let to = SocketAddr::from(([10, 0, 0, 2], 40000));
    let magic = [data.first().copied().unwrap_or(0); 8];

    if basic_packet_filter(data) {
        let _ = advanced_packet_filter(data, &magic, &from, &to);
        let _ = unwrap_sdk5(data, &[magic], &from, &to);
    }

    match packet_type(data) {
        Ok(PacketType::SessionUpdate) => {
            let _ = read_packet_unverified::<SessionUpdatePacket>(data);
        }
        Ok(PacketType::ServerInitRequest) => {
            let _ = read_packet_unverified::<ServerInitRequestPacket>(data);
        }
        Ok(PacketType::ServerUpdate) => {
            let _ = read_packet_unverified::<ServerUpdatePacket>(data);
        }
        Ok(PacketType::MatchDataRequest) => {
            let _ = read_packet_unverified::<MatchDataRequestPacket>(data);
        }
        _ => {}
    }

    let _ = read_message::<RelayUpdateRequest>(data);
});
