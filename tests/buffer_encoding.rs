use datasource_bridge::ch::{ByteBuf, Decimal};

fn read_leb128(bytes: &[u8]) -> (u64, &[u8]) {
    let mut result = 0u64;
    let mut shift = 0;
    for (i, b) in bytes.iter().enumerate() {
        result |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return (result, &bytes[i + 1..]);
        }
        shift += 7;
    }
    panic!("unterminated LEB128");
}

#[test]
fn leb128_round_trips() {
    for n in [0u64, 1, 127, 128, 255, 300, 16383, 16384, 1 << 20, u32::MAX as u64] {
        let mut buf = ByteBuf::new(10);
        buf.write_unsigned_leb128(n);
        let (decoded, rest) = read_leb128(buf.as_bytes());
        assert_eq!(decoded, n);
        assert!(rest.is_empty());
    }
}

#[test]
fn integer_round_trips() {
    for v in [i64::from(i8::MIN), -1, 0, 1, i64::from(i8::MAX)] {
        let mut buf = ByteBuf::new(1);
        buf.write_int8(v).unwrap();
        assert_eq!(buf.as_bytes()[0] as i8 as i64, v);
    }

    for v in [i64::from(i16::MIN), -1, 0, 1, i64::from(i16::MAX)] {
        let mut buf = ByteBuf::new(2);
        buf.write_int16(v).unwrap();
        let decoded = i16::from_le_bytes(buf.as_bytes().try_into().unwrap());
        assert_eq!(i64::from(decoded), v);
    }

    for v in [i32::MIN, -1, 0, 1, i32::MAX] {
        let mut buf = ByteBuf::new(4);
        buf.write_int32(v);
        assert_eq!(i32::from_le_bytes(buf.as_bytes().try_into().unwrap()), v);
    }

    for v in [i64::MIN, -1, 0, 1, i64::MAX] {
        let mut buf = ByteBuf::new(8);
        buf.write_int64(v);
        assert_eq!(i64::from_le_bytes(buf.as_bytes().try_into().unwrap()), v);
    }

    for v in [0i64, 1, 255] {
        let mut buf = ByteBuf::new(1);
        buf.write_uint8(v).unwrap();
        assert_eq!(i64::from(buf.as_bytes()[0]), v);
    }

    for v in [0i64, 65535] {
        let mut buf = ByteBuf::new(2);
        buf.write_uint16(v).unwrap();
        assert_eq!(i64::from(u16::from_le_bytes(buf.as_bytes().try_into().unwrap())), v);
    }

    for v in [0i64, (1i64 << 32) - 1] {
        let mut buf = ByteBuf::new(4);
        buf.write_uint32(v).unwrap();
        assert_eq!(i64::from(u32::from_le_bytes(buf.as_bytes().try_into().unwrap())), v);
    }

    for v in [0i64, i64::MAX] {
        let mut buf = ByteBuf::new(8);
        buf.write_uint64(v).unwrap();
        assert_eq!(i64::from_le_bytes(buf.as_bytes().try_into().unwrap()), v);
    }
}

#[test]
fn out_of_range_integers_are_rejected() {
    assert!(ByteBuf::new(1).write_int8(-129).is_err());
    assert!(ByteBuf::new(1).write_int16(65536).is_err());
    assert!(ByteBuf::new(1).write_uint8(256).is_err());
    assert!(ByteBuf::new(1).write_uint16(-1).is_err());
    assert!(ByteBuf::new(1).write_uint32(-1).is_err());
    assert!(ByteBuf::new(1).write_uint64(-1).is_err());
}

#[test]
fn string_prefix_is_leb128_of_utf8_length() {
    for s in ["", "a", "hello world", "héllo", "日本語テキスト", &"x".repeat(300)] {
        let mut buf = ByteBuf::new(16);
        buf.write_string(s);
        let (len, rest) = read_leb128(buf.as_bytes());
        assert_eq!(len as usize, s.as_bytes().len());
        assert_eq!(rest, s.as_bytes());
    }
}

#[test]
fn nullable_markers_are_single_bytes() {
    let mut buf = ByteBuf::new(8);
    buf.write_null();
    buf.write_non_null();
    buf.write_string("x");
    assert_eq!(buf.as_bytes()[0], 1);
    assert_eq!(buf.as_bytes()[1], 0);
    assert_eq!(&buf.as_bytes()[2..], &[1, b'x']);
}

#[test]
fn float_bit_patterns() {
    let mut buf = ByteBuf::new(4);
    buf.write_float32(1.5f32);
    assert_eq!(buf.as_bytes(), 1.5f32.to_bits().to_le_bytes());

    let mut buf = ByteBuf::new(8);
    buf.write_float64(-0.25f64);
    assert_eq!(buf.as_bytes(), (-0.25f64).to_bits().to_le_bytes());
}

fn read_decimal(bytes: &[u8], precision: i32) -> i128 {
    if precision > 18 {
        i128::from_le_bytes(bytes.try_into().unwrap())
    } else if precision > 9 {
        i64::from_le_bytes(bytes.try_into().unwrap()) as i128
    } else {
        i32::from_le_bytes(bytes.try_into().unwrap()) as i128
    }
}

#[test]
fn decimal_round_trips_over_every_precision_and_scale() {
    for precision in 1..=38i32 {
        for scale in 0..=precision {
            // a value with (precision - scale) integer digits at most
            let int_digits = ((precision - scale) as usize).min(6);
            let int_part = if int_digits == 0 { "0".to_string() } else { "7".repeat(int_digits) };
            let frac_part = "3".repeat((scale as usize).min(6));
            let text = if frac_part.is_empty() { int_part.clone() } else { format!("{int_part}.{frac_part}") };

            let value: Decimal = text.parse().unwrap();
            if !value.fits(precision, scale as u32).unwrap() {
                continue;
            }

            let mut buf = ByteBuf::new(16);
            buf.write_decimal(&value, precision, scale).unwrap();
            let mantissa = read_decimal(buf.as_bytes(), precision);
            assert_eq!(
                mantissa,
                value.rescale(scale as u32).unwrap(),
                "precision={precision} scale={scale} value={text}"
            );
        }
    }
}

#[test]
fn negative_decimals_round_trip() {
    for (text, precision, scale) in [("-1.25", 9, 2), ("-1.25", 18, 4), ("-123456.789", 38, 6)] {
        let value: Decimal = text.parse().unwrap();
        let mut buf = ByteBuf::new(16);
        buf.write_decimal(&value, precision, scale).unwrap();
        assert_eq!(read_decimal(buf.as_bytes(), precision), value.rescale(scale as u32).unwrap());
    }
}
