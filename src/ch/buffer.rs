use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

use crate::ch::column::ColumnInfo;
use crate::ch::data_type::DataType;
use crate::ch::decimal::Decimal;
use crate::ch::defaults::{DefaultValue, DefaultValues};
use crate::error::{BridgeError, Result};

const U_INT8_MAX: i64 = (1 << 8) - 1;
const U_INT16_MAX: i64 = (1 << 16) - 1;
const U_INT32_MAX: i64 = (1i64 << 32) - 1;

// 2106-02-07 06:28:15, the last second a DateTime can hold
const DATETIME_MAX_SECONDS: i64 = U_INT32_MAX;

/// Growable byte buffer that appends values in ClickHouse native wire order:
/// little-endian scalars, LEB128-prefixed strings, one leading byte per
/// nullable value.
///
/// The optional timezone applies to Date/DateTime values whose column does
/// not carry its own.
#[derive(Debug)]
pub struct ByteBuf {
    buf: Vec<u8>,
    timezone: Option<Tz>,
}

impl ByteBuf {
    pub fn new(size_hint: usize) -> Self {
        ByteBuf { buf: Vec::with_capacity(size_hint), timezone: None }
    }

    pub fn with_timezone(size_hint: usize, timezone: Option<Tz>) -> Self {
        ByteBuf { buf: Vec::with_capacity(size_hint), timezone }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_unsigned_leb128(&mut self, mut value: u64) -> &mut Self {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8 & 0x7f);
        self
    }

    pub fn write_byte(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    pub fn write_boolean(&mut self, value: bool) -> &mut Self {
        self.write_byte(if value { 1 } else { 0 })
    }

    pub fn write_null(&mut self) -> &mut Self {
        self.write_boolean(true)
    }

    pub fn write_non_null(&mut self) -> &mut Self {
        self.write_boolean(false)
    }

    pub fn write_int8(&mut self, value: i64) -> Result<&mut Self> {
        check_range(value, i8::MIN as i64, U_INT8_MAX)?;
        Ok(self.write_byte(value as u8))
    }

    pub fn write_uint8(&mut self, value: i64) -> Result<&mut Self> {
        check_range(value, 0, U_INT8_MAX)?;
        Ok(self.write_byte(value as u8))
    }

    pub fn write_int16(&mut self, value: i64) -> Result<&mut Self> {
        check_range(value, i16::MIN as i64, U_INT16_MAX)?;
        Ok(self.write_bytes(&(value as i16 as u16).to_le_bytes()))
    }

    pub fn write_uint16(&mut self, value: i64) -> Result<&mut Self> {
        check_range(value, 0, U_INT16_MAX)?;
        Ok(self.write_bytes(&(value as u16).to_le_bytes()))
    }

    pub fn write_int32(&mut self, value: i32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_uint32(&mut self, value: i64) -> Result<&mut Self> {
        check_range(value, 0, U_INT32_MAX)?;
        Ok(self.write_bytes(&(value as u32).to_le_bytes()))
    }

    pub fn write_int64(&mut self, value: i64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_uint64(&mut self, value: i64) -> Result<&mut Self> {
        if value < 0 {
            return Err(BridgeError::encoding(format!(
                "given value({value}) should NOT be less than 0"
            )));
        }
        Ok(self.write_bytes(&value.to_le_bytes()))
    }

    pub fn write_float32(&mut self, value: f32) -> &mut Self {
        self.write_int32(value.to_bits() as i32)
    }

    pub fn write_float64(&mut self, value: f64) -> &mut Self {
        self.write_int64(value.to_bits() as i64)
    }

    pub fn write_string(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();
        self.write_unsigned_leb128(bytes.len() as u64);
        self.write_bytes(bytes)
    }

    /// Days since 1970-01-01 as UInt16; the date is taken as-is, already in
    /// the local calendar of the column's timezone.
    pub fn write_date(&mut self, value: NaiveDate) -> Result<&mut Self> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch");
        let days = value.signed_duration_since(epoch).num_days();
        self.write_uint16(days)
    }

    /// Seconds since epoch as UInt32, clamped to the representable range
    /// rather than rejected; the naive timestamp is interpreted in `tz`, the
    /// buffer default, or UTC, in that order.
    pub fn write_datetime(&mut self, value: NaiveDateTime, tz: Option<Tz>) -> &mut Self {
        let seconds = self.epoch_seconds(value, tz).clamp(0, DATETIME_MAX_SECONDS);
        self.write_bytes(&(seconds as u32).to_le_bytes())
    }

    /// Milliseconds since epoch as UInt64, clamped non-negative.
    pub fn write_datetime64(&mut self, value: NaiveDateTime, tz: Option<Tz>) -> &mut Self {
        let millis = self.epoch_millis(value, tz).max(0);
        self.write_bytes(&millis.to_le_bytes())
    }

    pub fn write_decimal(&mut self, value: &Decimal, precision: i32, scale: i32) -> Result<&mut Self> {
        if precision > super::data_type::MAX_PRECISION {
            return Err(BridgeError::encoding(format!(
                "decimal precision {precision} exceeds the maximum of 38"
            )));
        }

        if precision > 18 {
            self.write_decimal128(value, scale)
        } else if precision > 9 {
            self.write_decimal64(value, scale)
        } else {
            self.write_decimal32(value, scale)
        }
    }

    pub fn write_decimal32(&mut self, value: &Decimal, scale: i32) -> Result<&mut Self> {
        let mantissa = value.rescale(scale.max(0) as u32)?;
        let mantissa = i32::try_from(mantissa)
            .map_err(|_| BridgeError::encoding(format!("value {value} does not fit Decimal32({scale})")))?;
        Ok(self.write_int32(mantissa))
    }

    pub fn write_decimal64(&mut self, value: &Decimal, scale: i32) -> Result<&mut Self> {
        let mantissa = value.rescale(scale.max(0) as u32)?;
        let mantissa = i64::try_from(mantissa)
            .map_err(|_| BridgeError::encoding(format!("value {value} does not fit Decimal64({scale})")))?;
        Ok(self.write_int64(mantissa))
    }

    /// Two's-complement little-endian payload, sign-extended to 16 bytes.
    pub fn write_decimal128(&mut self, value: &Decimal, scale: i32) -> Result<&mut Self> {
        let mantissa = value.rescale(scale.max(0) as u32)?;
        Ok(self.write_bytes(&mantissa.to_le_bytes()))
    }

    /// Zero-ish typed default for a column, used when the backend returns
    /// null and the caller asked for `null_as_default`.
    pub fn write_default_value(&mut self, column: &ColumnInfo, defaults: &DefaultValues) -> Result<&mut Self> {
        let value = defaults.get(column.data_type);

        match column.data_type {
            DataType::Int8 => self.write_int8(value.as_int()),
            DataType::Int16 => self.write_int16(value.as_int()),
            DataType::Int32 => Ok(self.write_int32(value.as_int() as i32)),
            DataType::Int64 => Ok(self.write_int64(value.as_int())),
            DataType::UInt8 => self.write_uint8(value.as_int()),
            DataType::UInt16 => self.write_uint16(value.as_int()),
            DataType::UInt32 => self.write_uint32(value.as_int()),
            DataType::UInt64 => self.write_uint64(value.as_int()),
            DataType::Float32 => Ok(self.write_float32(value.as_float() as f32)),
            DataType::Float64 => Ok(self.write_float64(value.as_float())),
            DataType::Date => self.write_uint16(value.as_int()),
            DataType::DateTime => self.write_uint32(value.as_int()),
            DataType::DateTime64 => self.write_uint64(value.as_int()),
            DataType::Decimal => self.write_decimal(&value.as_decimal(), column.precision, column.scale),
            DataType::Decimal32 => self.write_decimal32(&value.as_decimal(), column.scale),
            DataType::Decimal64 => self.write_decimal64(&value.as_decimal(), column.scale),
            DataType::Decimal128 => self.write_decimal128(&value.as_decimal(), column.scale),
            DataType::String => Ok(self.write_string(value.as_text())),
        }
    }

    fn effective_tz(&self, tz: Option<Tz>) -> Option<Tz> {
        tz.or(self.timezone)
    }

    fn epoch_seconds(&self, value: NaiveDateTime, tz: Option<Tz>) -> i64 {
        match self.effective_tz(tz) {
            Some(tz) => tz
                .from_local_datetime(&value)
                .earliest()
                .map(|dt| dt.timestamp())
                .unwrap_or_else(|| value.and_utc().timestamp()),
            None => value.and_utc().timestamp(),
        }
    }

    fn epoch_millis(&self, value: NaiveDateTime, tz: Option<Tz>) -> i64 {
        match self.effective_tz(tz) {
            Some(tz) => tz
                .from_local_datetime(&value)
                .earliest()
                .map(|dt| dt.timestamp_millis())
                .unwrap_or_else(|| value.and_utc().timestamp_millis()),
            None => value.and_utc().timestamp_millis(),
        }
    }
}

fn check_range(value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(BridgeError::encoding(format!(
            "given value({value}) should be between {min} and {max}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leb128_layout() {
        let mut buf = ByteBuf::new(8);
        buf.write_unsigned_leb128(0);
        buf.write_unsigned_leb128(127);
        buf.write_unsigned_leb128(128);
        buf.write_unsigned_leb128(300);
        assert_eq!(buf.as_bytes(), &[0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);
    }

    #[test]
    fn int8_accepts_unsigned_range() {
        let mut buf = ByteBuf::new(4);
        buf.write_int8(i8::MIN as i64).unwrap();
        buf.write_int8(i8::MAX as i64).unwrap();
        buf.write_int8(0xff).unwrap();
        assert_eq!(buf.as_bytes(), &[0x80, 0x7f, 0xff]);
        assert!(ByteBuf::new(1).write_int8(-129).is_err());
        assert!(ByteBuf::new(1).write_int8(256).is_err());
    }

    #[test]
    fn unsigned_writes_are_range_checked() {
        assert!(ByteBuf::new(1).write_uint8(-1).is_err());
        assert!(ByteBuf::new(1).write_uint16(65536).is_err());
        assert!(ByteBuf::new(1).write_uint32(1i64 << 32).is_err());
        assert!(ByteBuf::new(1).write_uint64(-1).is_err());
    }

    #[test]
    fn scalars_are_little_endian() {
        let mut buf = ByteBuf::new(16);
        buf.write_int32(0x0403_0201);
        buf.write_uint16(0x0201).unwrap();
        assert_eq!(buf.as_bytes(), &[1, 2, 3, 4, 1, 2]);
    }

    #[test]
    fn string_is_length_prefixed_utf8() {
        let mut buf = ByteBuf::new(16);
        buf.write_string("héllo");
        let bytes = "héllo".as_bytes();
        assert_eq!(buf.as_bytes()[0] as usize, bytes.len());
        assert_eq!(&buf.as_bytes()[1..], bytes);
    }

    #[test]
    fn datetime_clamps_out_of_range() {
        let mut buf = ByteBuf::new(8);
        let before_epoch = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        buf.write_datetime(before_epoch, None);
        assert_eq!(buf.as_bytes(), &[0, 0, 0, 0]);

        let mut buf = ByteBuf::new(8);
        let far_future = NaiveDate::from_ymd_opt(3000, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        buf.write_datetime(far_future, None);
        assert_eq!(buf.as_bytes(), &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn decimal_dispatches_by_precision() {
        let v: Decimal = "1.5".parse().unwrap();

        let mut buf = ByteBuf::new(4);
        buf.write_decimal(&v, 9, 2).unwrap();
        assert_eq!(buf.as_bytes(), &150i32.to_le_bytes());

        let mut buf = ByteBuf::new(8);
        buf.write_decimal(&v, 18, 2).unwrap();
        assert_eq!(buf.as_bytes(), &150i64.to_le_bytes());

        let mut buf = ByteBuf::new(16);
        buf.write_decimal(&v, 38, 2).unwrap();
        assert_eq!(buf.as_bytes(), &150i128.to_le_bytes());

        assert!(ByteBuf::new(1).write_decimal(&v, 39, 2).is_err());
    }

    #[test]
    fn decimal128_is_sign_extended() {
        let v: Decimal = "-1".parse().unwrap();
        let mut buf = ByteBuf::new(16);
        buf.write_decimal128(&v, 0).unwrap();
        assert_eq!(buf.as_bytes(), &(-1i128).to_le_bytes());
        assert_eq!(buf.len(), 16);
    }
}
