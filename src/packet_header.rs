use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{Debug, Formatter};
use crate::error::RudpError;
use crate::frame::SeqNum;

/// Flow control directive, sent from the receiver to the sender. `RetransmitRequest` is the
///  reserved value that turns `seq_num` / `ack_num` into the bounds of a missing range.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Signal {
    None = 0,
    Stop = 1,
    Resume = 2,
    RetransmitRequest = 3,
}

/// The fixed-size header every datagram starts with. All numbers are in network byte order (BE):
///
/// ```ascii
/// 0: seq_num (u32)       sequence number of the carried frame, 'from' for retransmit requests
/// 4: ack_num (u32)       acknowledged sequence number, 'to' for retransmit requests
/// 8: signal (u8)         see [Signal]
/// 9: is_retransmit (u8)  1 if the payload is a retransmitted frame, 0 otherwise
/// ```
///
/// The payload (if any) follows directly after the header.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PacketHeader {
    pub seq_num: SeqNum,
    pub ack_num: SeqNum,
    pub signal: Signal,
    pub is_retransmit: bool,
}

impl Debug for PacketHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HDR{{#{} ack {} {:?}{}}}",
               self.seq_num,
               self.ack_num,
               self.signal,
               if self.is_retransmit { " RETRANSMIT" } else { "" },
        )
    }
}

impl PacketHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u32>() + size_of::<u32>() + size_of::<u8>() + size_of::<u8>();

    pub fn data(seq_num: SeqNum, is_retransmit: bool) -> PacketHeader {
        PacketHeader {
            seq_num,
            ack_num: SeqNum::ZERO,
            signal: Signal::None,
            is_retransmit,
        }
    }

    pub fn ack(ack_num: SeqNum, signal: Signal) -> PacketHeader {
        PacketHeader {
            seq_num: SeqNum::ZERO,
            ack_num,
            signal,
            is_retransmit: false,
        }
    }

    pub fn retransmit_request(from: SeqNum, to: SeqNum) -> PacketHeader {
        PacketHeader {
            seq_num: from,
            ack_num: to,
            signal: Signal::RetransmitRequest,
            is_retransmit: false,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.seq_num.to_raw());
        buf.put_u32(self.ack_num.to_raw());
        buf.put_u8(self.signal.into());
        buf.put_u8(self.is_retransmit as u8);
    }

    /// Reads a header from the start of `buf`, leaving `buf` positioned at the payload
    pub fn deser(buf: &mut impl Buf) -> Result<PacketHeader, RudpError> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(RudpError::MalformedHeader {
                expected: Self::SERIALIZED_LEN,
                actual: buf.remaining(),
            });
        }

        let seq_num = SeqNum::from_raw(buf.get_u32());
        let ack_num = SeqNum::from_raw(buf.get_u32());
        let raw_signal = buf.get_u8();
        let signal = Signal::try_from(raw_signal)
            .map_err(|_| RudpError::UnknownSignal(raw_signal))?;
        let is_retransmit = buf.get_u8() != 0;

        Ok(PacketHeader {
            seq_num,
            ack_num,
            signal,
            is_retransmit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::data(PacketHeader::data(SeqNum::from_raw(5), false), vec![0,0,0,5, 0,0,0,0, 0, 0])]
    #[case::data_retransmit(PacketHeader::data(SeqNum::from_raw(0x01020304), true), vec![1,2,3,4, 0,0,0,0, 0, 1])]
    #[case::ack(PacketHeader::ack(SeqNum::from_raw(258), Signal::None), vec![0,0,0,0, 0,0,1,2, 0, 0])]
    #[case::ack_zero(PacketHeader::ack(SeqNum::ZERO, Signal::None), vec![0,0,0,0, 0,0,0,0, 0, 0])]
    #[case::stop(PacketHeader::ack(SeqNum::from_raw(7), Signal::Stop), vec![0,0,0,0, 0,0,0,7, 1, 0])]
    #[case::resume(PacketHeader::ack(SeqNum::ZERO, Signal::Resume), vec![0,0,0,0, 0,0,0,0, 2, 0])]
    #[case::retransmit_request(PacketHeader::retransmit_request(SeqNum::from_raw(3), SeqNum::from_raw(9)), vec![0,0,0,3, 0,0,0,9, 3, 0])]
    #[case::max_values(PacketHeader { seq_num: SeqNum::MAX, ack_num: SeqNum::MAX, signal: Signal::Stop, is_retransmit: true }, vec![255,255,255,255, 255,255,255,255, 1, 1])]
    fn test_ser_deser(#[case] header: PacketHeader, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(buf.len(), PacketHeader::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = PacketHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, header);
    }

    #[test]
    fn test_ser_deser_all_field_combinations() {
        let signals = [Signal::None, Signal::Stop, Signal::Resume, Signal::RetransmitRequest];
        let seq_nums = [0, 1, 0xff, 0x100, 0x0102_0304, u32::MAX - 1, u32::MAX].map(SeqNum::from_raw);

        for signal in signals {
            for is_retransmit in [false, true] {
                for seq_num in seq_nums {
                    for ack_num in seq_nums {
                        let header = PacketHeader { seq_num, ack_num, signal, is_retransmit };

                        let mut buf = BytesMut::new();
                        header.ser(&mut buf);
                        assert_eq!(buf.len(), PacketHeader::SERIALIZED_LEN);

                        let mut b: &[u8] = &buf;
                        assert_eq!(PacketHeader::deser(&mut b), Ok(header));
                        assert!(b.is_empty());
                    }
                }
            }
        }
    }

    #[test]
    fn test_deser_leaves_payload() {
        let mut b: &[u8] = &[0,0,0,9, 0,0,0,0, 0, 1, 42, 43];
        let header = PacketHeader::deser(&mut b).unwrap();
        assert_eq!(header, PacketHeader::data(SeqNum::from_raw(9), true));
        assert_eq!(b, &[42, 43]);
    }

    #[test]
    fn test_deser_nonzero_retransmit_flag() {
        let mut b: &[u8] = &[0,0,0,9, 0,0,0,0, 0, 7];
        assert!(PacketHeader::deser(&mut b).unwrap().is_retransmit);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::one_byte(vec![0])]
    #[case::seq_only(vec![0,0,0,1])]
    #[case::missing_flag(vec![0,0,0,1, 0,0,0,2, 0])]
    fn test_deser_truncated(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert_eq!(
            PacketHeader::deser(&mut b),
            Err(RudpError::MalformedHeader { expected: 10, actual: raw.len() }),
        );
    }

    #[rstest]
    #[case(4)]
    #[case(255)]
    fn test_deser_unknown_signal(#[case] signal: u8) {
        let mut b: &[u8] = &[0,0,0,1, 0,0,0,2, signal, 0];
        assert_eq!(PacketHeader::deser(&mut b), Err(RudpError::UnknownSignal(signal)));
    }
}
