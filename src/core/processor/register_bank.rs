// src/core/processor/register_bank.rs

//! An in-memory MODBUS data model (coils, discrete inputs, holding and input
//! registers) and the processor that serves requests against it.

use super::MessageProcessor;
use crate::config::RegisterConfig;
use crate::core::protocol::{ExceptionCode, MbapFrame, Request, Response};
use parking_lot::RwLock;
use std::ops::Range;
use tracing::debug;

/// The four MODBUS tables.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl RegisterBank {
    /// Creates a zeroed bank sized according to `config`.
    pub fn new(config: &RegisterConfig) -> Self {
        Self {
            coils: vec![false; config.coils],
            discrete_inputs: vec![false; config.discrete_inputs],
            holding_registers: vec![0; config.holding_registers],
            input_registers: vec![0; config.input_registers],
        }
    }

    /// Maps `address..address + quantity` onto a table of `len` entries.
    fn range(len: usize, address: u16, quantity: usize) -> Result<Range<usize>, ExceptionCode> {
        let start = address as usize;
        let end = start + quantity;
        if end > len {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(start..end)
    }

    /// Serves a read request. Write requests are not accepted here.
    pub fn read(&self, request: &Request) -> Result<Response, ExceptionCode> {
        match *request {
            Request::ReadCoils { address, quantity } => {
                let range = Self::range(self.coils.len(), address, quantity as usize)?;
                Ok(Response::ReadCoils(self.coils[range].to_vec()))
            }
            Request::ReadDiscreteInputs { address, quantity } => {
                let range = Self::range(self.discrete_inputs.len(), address, quantity as usize)?;
                Ok(Response::ReadDiscreteInputs(
                    self.discrete_inputs[range].to_vec(),
                ))
            }
            Request::ReadHoldingRegisters { address, quantity } => {
                let range =
                    Self::range(self.holding_registers.len(), address, quantity as usize)?;
                Ok(Response::ReadHoldingRegisters(
                    self.holding_registers[range].to_vec(),
                ))
            }
            Request::ReadInputRegisters { address, quantity } => {
                let range = Self::range(self.input_registers.len(), address, quantity as usize)?;
                Ok(Response::ReadInputRegisters(
                    self.input_registers[range].to_vec(),
                ))
            }
            _ => Err(ExceptionCode::ServerDeviceFailure),
        }
    }

    /// Serves a write request. Nothing is modified when the request is rejected.
    pub fn write(&mut self, request: Request) -> Result<Response, ExceptionCode> {
        match request {
            Request::WriteSingleCoil { address, value } => {
                let range = Self::range(self.coils.len(), address, 1)?;
                self.coils[range.start] = value;
                Ok(Response::WriteSingleCoil { address, value })
            }
            Request::WriteSingleRegister { address, value } => {
                let range = Self::range(self.holding_registers.len(), address, 1)?;
                self.holding_registers[range.start] = value;
                Ok(Response::WriteSingleRegister { address, value })
            }
            Request::WriteMultipleCoils { address, values } => {
                let range = Self::range(self.coils.len(), address, values.len())?;
                self.coils[range].copy_from_slice(&values);
                Ok(Response::WriteMultipleCoils {
                    address,
                    quantity: values.len() as u16,
                })
            }
            Request::WriteMultipleRegisters { address, values } => {
                let range = Self::range(self.holding_registers.len(), address, values.len())?;
                self.holding_registers[range].copy_from_slice(&values);
                Ok(Response::WriteMultipleRegisters {
                    address,
                    quantity: values.len() as u16,
                })
            }
            read => self.read(&read),
        }
    }
}

/// A `MessageProcessor` backed by a shared `RegisterBank`.
#[derive(Debug)]
pub struct RegisterBankProcessor {
    bank: RwLock<RegisterBank>,
}

impl RegisterBankProcessor {
    pub fn new(config: &RegisterConfig) -> Self {
        Self {
            bank: RwLock::new(RegisterBank::new(config)),
        }
    }

    /// Executes a decoded request, taking the write lock only for writes.
    pub fn execute(&self, request: Request) -> Result<Response, ExceptionCode> {
        match request {
            Request::ReadCoils { .. }
            | Request::ReadDiscreteInputs { .. }
            | Request::ReadHoldingRegisters { .. }
            | Request::ReadInputRegisters { .. } => self.bank.read().read(&request),
            write => self.bank.write().write(write),
        }
    }

    pub fn set_coil(&self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        let mut bank = self.bank.write();
        let range = RegisterBank::range(bank.coils.len(), address, 1)?;
        bank.coils[range.start] = value;
        Ok(())
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        let mut bank = self.bank.write();
        let range = RegisterBank::range(bank.discrete_inputs.len(), address, 1)?;
        bank.discrete_inputs[range.start] = value;
        Ok(())
    }

    pub fn set_holding_register(&self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        let mut bank = self.bank.write();
        let range = RegisterBank::range(bank.holding_registers.len(), address, 1)?;
        bank.holding_registers[range.start] = value;
        Ok(())
    }

    pub fn set_input_register(&self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        let mut bank = self.bank.write();
        let range = RegisterBank::range(bank.input_registers.len(), address, 1)?;
        bank.input_registers[range.start] = value;
        Ok(())
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.bank.read().coils.get(address as usize).copied()
    }

    pub fn discrete_input(&self, address: u16) -> Option<bool> {
        self.bank.read().discrete_inputs.get(address as usize).copied()
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.bank.read().holding_registers.get(address as usize).copied()
    }

    pub fn input_register(&self, address: u16) -> Option<u16> {
        self.bank.read().input_registers.get(address as usize).copied()
    }
}

impl MessageProcessor for RegisterBankProcessor {
    fn process(&self, frame: MbapFrame) -> MbapFrame {
        let function = frame.function_code().unwrap_or_default();
        let response = Request::parse(&frame.pdu)
            .and_then(|request| self.execute(request))
            .unwrap_or_else(|code| Response::exception(function, code));

        if let Response::Exception { code, .. } = &response {
            debug!(
                "Unit {}: function {:#04x} answered with exception {}",
                frame.unit_id, function, code
            );
        }
        frame.reply(response.to_pdu())
    }
}
