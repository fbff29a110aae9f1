//! Property-based tests for the core round-trip and size laws.

use binstruct::{calcsize, pack, unpack, unpack_from, Struct, Value};
use proptest::prelude::*;

fn uints(values: &[u8]) -> Vec<Value> {
    values.iter().map(|&v| Value::Uint(u64::from(v))).collect()
}

proptest! {
    // Law: unpack(pack(V)) == V for scalars of every width
    #[test]
    fn prop_roundtrip_u8_vector(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let format = format!("{}B", data.len());
        let args = uints(&data);
        let packed = pack(&format, &args, &[]).unwrap();
        prop_assert_eq!(&packed, &data);
        prop_assert_eq!(unpack(&format, &packed, &[]).unwrap(), args);
    }

    #[test]
    fn prop_roundtrip_i64(value in any::<i64>()) {
        for format in ["<q", ">q"] {
            let args = vec![Value::Int(value)];
            let packed = pack(format, &args, &[]).unwrap();
            prop_assert_eq!(packed.len(), 8);
            prop_assert_eq!(unpack(format, &packed, &[]).unwrap(), args);
        }
    }

    #[test]
    fn prop_roundtrip_i24(value in -8_388_608i64..8_388_608) {
        let args = vec![Value::Int(value)];
        let packed = pack("<u", &args, &[]).unwrap();
        prop_assert_eq!(packed.len(), 3);
        prop_assert_eq!(unpack("<u", &packed, &[]).unwrap(), args);
    }

    #[test]
    fn prop_roundtrip_f64(value in any::<f64>()) {
        // -0.0 packs as +0.0
        prop_assume!(!(value == 0.0 && value.is_sign_negative()));
        let args = vec![Value::Float(value)];
        let packed = pack("<d", &args, &[]).unwrap();
        prop_assert_eq!(&packed, &value.to_le_bytes());
        prop_assert_eq!(unpack("<d", &packed, &[]).unwrap(), args);
    }

    #[test]
    fn prop_roundtrip_f32(value in any::<f32>()) {
        prop_assume!(!(value == 0.0 && value.is_sign_negative()));
        let args = vec![Value::Float(f64::from(value))];
        let packed = pack(">f", &args, &[]).unwrap();
        prop_assert_eq!(&packed, &value.to_be_bytes());
        prop_assert_eq!(unpack(">f", &packed, &[]).unwrap(), args);
    }

    // Half-precision bit patterns survive decode/encode, except NaN
    // payloads (canonicalised) and the sign of zero
    #[test]
    fn prop_half_bits_roundtrip(bits in any::<u16>()) {
        prop_assume!(bits & 0x7c00 != 0x7c00);
        prop_assume!(bits != 0x8000);
        let raw = bits.to_le_bytes();
        let decoded = unpack("<e", &raw, &[]).unwrap();
        let packed = pack("<e", &decoded, &[]).unwrap();
        prop_assert_eq!(&packed, &raw);
    }

    // Law: a successful calcsize predicts the packed length and the
    // number of bytes unpacking consumes
    #[test]
    fn prop_size_determinism(
        header in prop::collection::vec(any::<u8>(), 4),
        a in any::<u32>(),
        b in any::<u32>(),
        tail in prop::collection::vec(any::<u8>(), 3),
        junk in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let format = "<4s 2I |3B 8a 2x";
        let size = calcsize(format, None).unwrap();

        let mut args = vec![Value::Bytes(header)];
        args.push(Value::Uint(u64::from(a)));
        args.push(Value::Uint(u64::from(b)));
        args.extend(uints(&tail));

        let packed = pack(format, &args, &[]).unwrap();
        prop_assert_eq!(packed.len(), size);

        // Trailing junk is ignored and the end position lands on the size
        let mut data = packed;
        data.extend_from_slice(&junk);
        let (decoded, end) = unpack_from(format, &data, 0, &[]).unwrap();
        prop_assert_eq!(decoded, args);
        prop_assert_eq!(end, size);
    }

    // Reference-counted elements round-trip
    #[test]
    fn prop_roundtrip_length_prefixed(payload in prop::collection::vec(any::<u8>(), 0..255)) {
        let args = vec![
            Value::Uint(payload.len() as u64),
            Value::Bytes(payload),
        ];
        let packed = pack("B /0s", &args, &[]).unwrap();
        prop_assert_eq!(unpack("B /0s", &packed, &[]).unwrap(), args);
    }

    // Law: concat(A, B) decodes like A, then B on the remainder
    #[test]
    fn prop_concat_decodes_sequentially(
        first in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let left = Struct::new("<H").unwrap();
        let right = Struct::new("B /0s").unwrap();
        let combined = left.concat(&right).unwrap();

        let left_args = vec![Value::Uint(u64::from(first))];
        let right_args = vec![
            Value::Uint(payload.len() as u64),
            Value::Bytes(payload),
        ];
        let mut data = left.pack(&left_args, &[]).unwrap();
        data.extend(right.pack(&right_args, &[]).unwrap());

        let mut expected = left_args;
        expected.extend(right_args);
        prop_assert_eq!(combined.unpack(&data, &[]).unwrap(), expected);
    }

    // Law: repeat(A, k) decodes k consecutive copies
    #[test]
    fn prop_repeat_decodes_copies(records in prop::collection::vec(any::<u16>(), 1..8)) {
        let block = Struct::new("<H").unwrap();
        let repeated = block.repeat(records.len()).unwrap();
        let mut data = Vec::new();
        for &record in &records {
            data.extend_from_slice(&record.to_le_bytes());
        }
        let expected: Vec<Value> = records.iter().map(|&r| Value::Uint(u64::from(r))).collect();
        prop_assert_eq!(repeated.unpack(&data, &[]).unwrap(), expected);
    }
}
