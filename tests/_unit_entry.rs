// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::all)]

mod unit_tests {
    use std::collections::HashMap;

    use flowcap::{
        cfg::config::Config,
        decap,
        packet::{Packet, PacketRc},
        parsers::{self, Registry},
        session::{Session, SessionId},
    };

    /// Registry plus a miniature session table: enough of the packet-worker
    /// loop to drive frames end to end in tests.
    pub struct TestEngine {
        pub reg: Registry,
        pub sessions: HashMap<SessionId, Session>,
        pub order: Vec<SessionId>,
    }

    impl TestEngine {
        pub fn new() -> Self {
            Self::with_config(Config::default())
        }

        pub fn with_config(cfg: Config) -> Self {
            TestEngine {
                reg: parsers::init(&cfg),
                sessions: HashMap::new(),
                order: Vec::new(),
            }
        }

        /// Runs one Ethernet frame through decap and session processing.
        pub fn feed(&mut self, frame: Vec<u8>, ts_sec: u64) -> (PacketRc, Packet) {
            let wire_len = frame.len() as u32;
            let mut packet = Packet::new(frame, ts_sec, 0, wire_len);
            packet.link_type = 1; // EN10MB

            let rc = decap::process_frame(&mut packet, &self.reg);
            if rc != PacketRc::DoProcess {
                return (rc, packet);
            }

            let mp = self.reg.mprotocol(packet.mprotocol);
            let id = (mp.create_session_id)(&packet);
            let is_new = !self.sessions.contains_key(&id);
            let session = self.sessions.entry(id).or_insert_with(|| {
                Session::new(id, packet.mprotocol, ts_sec)
            });
            if is_new {
                self.order.push(id);
                session.vlan = packet.vlan;
                session.vni = packet.vni;
            }
            if let Some(pre) = mp.pre_process {
                pre(session, &mut packet, is_new, &self.reg);
            }
            let dir = packet.direction as usize;
            session.packets[dir] += 1;
            session.bytes[dir] += packet.caplen() as u64;
            session.last_sec = session.last_sec.max(ts_sec);
            if let Some(process) = mp.process {
                process(session, &packet, &self.reg);
            }
            (rc, packet)
        }

        /// The only session, when the test expects exactly one.
        pub fn single_session(&mut self) -> &mut Session {
            assert_eq!(self.sessions.len(), 1, "expected exactly one session");
            let id = self.order[0];
            self.sessions.get_mut(&id).expect("session exists")
        }
    }

    // ── frame builders ───────────────────────────────────────────────────

    pub fn eth_frame(ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // dst
            0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // src
        ];
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    pub fn ip4_packet(proto: u8, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let total = 20 + payload.len();
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        ip[8] = 64; // ttl
        ip[9] = proto;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);
        ip.extend_from_slice(payload);
        ip
    }

    pub fn udp_datagram(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut udp = Vec::with_capacity(8 + payload.len());
        udp.extend_from_slice(&sport.to_be_bytes());
        udp.extend_from_slice(&dport.to_be_bytes());
        udp.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        udp.extend_from_slice(&[0, 0]); // checksum
        udp.extend_from_slice(payload);
        udp
    }

    pub fn tcp_segment(sport: u16, dport: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&sport.to_be_bytes());
        tcp[2..4].copy_from_slice(&dport.to_be_bytes());
        tcp[12] = 5 << 4; // data offset
        tcp[13] = flags;
        tcp[14] = 0xff; // window
        tcp.extend_from_slice(payload);
        tcp
    }

    /// Convenience: Ethernet + IPv4 + UDP in one call.
    pub fn udp_frame(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        eth_frame(
            0x0800,
            &ip4_packet(17, src, dst, &udp_datagram(sport, dport, payload)),
        )
    }

    /// Convenience: Ethernet + IPv4 + TCP in one call.
    pub fn tcp_frame(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        eth_frame(
            0x0800,
            &ip4_packet(6, src, dst, &tcp_segment(sport, dport, 0x18, payload)),
        )
    }

    pub mod test_dcerpc;
    pub mod test_decap;
    pub mod test_dhcp;
    pub mod test_dns;
    pub mod test_fields;
    pub mod test_krb5;
    pub mod test_parser_buf;
    pub mod test_pcap_stream;
    pub mod test_session_id;
    pub mod test_session_table;
    pub mod test_smb;
    pub mod test_writer_blocks;
}
