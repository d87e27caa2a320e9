// src/core/protocol/pdu.rs

//! MODBUS protocol data units: function codes, exception codes, and the
//! request/response shapes the register bank understands.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum number of bits a single read request may ask for.
pub const MAX_READ_BITS: u16 = 2000;
/// Maximum number of registers a single read request may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Maximum number of coils in a Write Multiple Coils request.
pub const MAX_WRITE_COILS: u16 = 1968;
/// Maximum number of registers in a Write Multiple Registers request.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// The public function codes served by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ExceptionCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x05 => Ok(Self::WriteSingleCoil),
            0x06 => Ok(Self::WriteSingleRegister),
            0x0F => Ok(Self::WriteMultipleCoils),
            0x10 => Ok(Self::WriteMultipleRegisters),
            _ => Err(ExceptionCode::IllegalFunction),
        }
    }
}

/// Exception codes returned to the client inside an exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A decoded request PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl Request {
    /// Parses a request PDU. The error is the exception to answer with.
    pub fn parse(pdu: &[u8]) -> Result<Self, ExceptionCode> {
        let mut buf = pdu;
        if !buf.has_remaining() {
            return Err(ExceptionCode::IllegalFunction);
        }
        let function = FunctionCode::try_from(buf.get_u8())?;

        match function {
            FunctionCode::ReadCoils => {
                let (address, quantity) = read_range(&mut buf, MAX_READ_BITS)?;
                Ok(Request::ReadCoils { address, quantity })
            }
            FunctionCode::ReadDiscreteInputs => {
                let (address, quantity) = read_range(&mut buf, MAX_READ_BITS)?;
                Ok(Request::ReadDiscreteInputs { address, quantity })
            }
            FunctionCode::ReadHoldingRegisters => {
                let (address, quantity) = read_range(&mut buf, MAX_READ_REGISTERS)?;
                Ok(Request::ReadHoldingRegisters { address, quantity })
            }
            FunctionCode::ReadInputRegisters => {
                let (address, quantity) = read_range(&mut buf, MAX_READ_REGISTERS)?;
                Ok(Request::ReadInputRegisters { address, quantity })
            }
            FunctionCode::WriteSingleCoil => {
                let (address, raw) = read_pair(&mut buf)?;
                let value = match raw {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(ExceptionCode::IllegalDataValue),
                };
                Ok(Request::WriteSingleCoil { address, value })
            }
            FunctionCode::WriteSingleRegister => {
                let (address, value) = read_pair(&mut buf)?;
                Ok(Request::WriteSingleRegister { address, value })
            }
            FunctionCode::WriteMultipleCoils => {
                let (address, quantity) = read_range(&mut buf, MAX_WRITE_COILS)?;
                let payload = read_payload(&mut buf, (quantity as usize).div_ceil(8))?;
                Ok(Request::WriteMultipleCoils {
                    address,
                    values: unpack_bits(payload, quantity as usize),
                })
            }
            FunctionCode::WriteMultipleRegisters => {
                let (address, quantity) = read_range(&mut buf, MAX_WRITE_REGISTERS)?;
                let mut payload = read_payload(&mut buf, quantity as usize * 2)?;
                let values = (0..quantity).map(|_| payload.get_u16()).collect();
                Ok(Request::WriteMultipleRegisters { address, values })
            }
        }
    }

    pub fn function_code(&self) -> FunctionCode {
        match self {
            Request::ReadCoils { .. } => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }
}

/// Reads a `(start address, quantity)` pair and checks the quantity bound.
fn read_range(buf: &mut &[u8], max_quantity: u16) -> Result<(u16, u16), ExceptionCode> {
    let (address, quantity) = read_pair(buf)?;
    if quantity == 0 || quantity > max_quantity {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((address, quantity))
}

fn read_pair(buf: &mut &[u8]) -> Result<(u16, u16), ExceptionCode> {
    if buf.remaining() < 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((buf.get_u16(), buf.get_u16()))
}

/// Reads the byte count of a multiple-write request and returns its payload.
fn read_payload<'a>(buf: &mut &'a [u8], expected: usize) -> Result<&'a [u8], ExceptionCode> {
    if !buf.has_remaining() {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let byte_count = buf.get_u8() as usize;
    if byte_count != expected || buf.remaining() < byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let rest: &'a [u8] = *buf;
    let (payload, tail) = rest.split_at(byte_count);
    *buf = tail;
    Ok(payload)
}

/// A response PDU, ready to be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    Exception { function: u8, code: ExceptionCode },
}

impl Response {
    /// An exception answer to the given raw function code.
    pub fn exception(function: u8, code: ExceptionCode) -> Self {
        Response::Exception {
            function: function & !EXCEPTION_FLAG,
            code,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Response::Exception { .. })
    }

    /// Serializes the response into PDU bytes.
    pub fn to_pdu(&self) -> Bytes {
        let mut dst = BytesMut::new();
        match self {
            Response::ReadCoils(bits) => put_bits(&mut dst, FunctionCode::ReadCoils, bits),
            Response::ReadDiscreteInputs(bits) => {
                put_bits(&mut dst, FunctionCode::ReadDiscreteInputs, bits)
            }
            Response::ReadHoldingRegisters(values) => {
                put_registers(&mut dst, FunctionCode::ReadHoldingRegisters, values)
            }
            Response::ReadInputRegisters(values) => {
                put_registers(&mut dst, FunctionCode::ReadInputRegisters, values)
            }
            Response::WriteSingleCoil { address, value } => {
                dst.put_u8(FunctionCode::WriteSingleCoil.code());
                dst.put_u16(*address);
                dst.put_u16(if *value { COIL_ON } else { COIL_OFF });
            }
            Response::WriteSingleRegister { address, value } => {
                dst.put_u8(FunctionCode::WriteSingleRegister.code());
                dst.put_u16(*address);
                dst.put_u16(*value);
            }
            Response::WriteMultipleCoils { address, quantity } => {
                dst.put_u8(FunctionCode::WriteMultipleCoils.code());
                dst.put_u16(*address);
                dst.put_u16(*quantity);
            }
            Response::WriteMultipleRegisters { address, quantity } => {
                dst.put_u8(FunctionCode::WriteMultipleRegisters.code());
                dst.put_u16(*address);
                dst.put_u16(*quantity);
            }
            Response::Exception { function, code } => {
                dst.put_u8(function | EXCEPTION_FLAG);
                dst.put_u8(code.code());
            }
        }
        dst.freeze()
    }
}

fn put_bits(dst: &mut BytesMut, function: FunctionCode, bits: &[bool]) {
    let packed = pack_bits(bits);
    dst.put_u8(function.code());
    dst.put_u8(packed.len() as u8);
    dst.extend_from_slice(&packed);
}

fn put_registers(dst: &mut BytesMut, function: FunctionCode, values: &[u16]) {
    dst.put_u8(function.code());
    dst.put_u8((values.len() * 2) as u8);
    for value in values {
        dst.put_u16(*value);
    }
}

/// Packs bits LSB-first, as MODBUS transmits coils and discrete inputs.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        packed[i / 8] |= 1 << (i % 8);
    }
    packed
}

/// Unpacks `count` LSB-first bits.
pub fn unpack_bits(packed: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| packed[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}
