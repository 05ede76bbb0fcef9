//! Replication instruction emission.
//!
//! Every mutating call hands the sink one structured instruction. The
//! core only emits; it never reads replication state back. Instructions
//! derive serde so a sink can journal them without a bespoke codec.

use ember_types::{ColKey, Mixed, ObjKey, TableKey};

/// One mutation, as seen by a replication consumer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Instruction {
    CreateObject {
        table: TableKey,
        obj: ObjKey,
    },
    RemoveObject {
        table: TableKey,
        obj: ObjKey,
    },
    Set {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        value: Mixed,
    },
    /// A `Set` that only establishes a default and must not clobber
    /// concurrent writes when merged.
    SetDefault {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        value: Mixed,
    },
    SetNull {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
    },
    AddInt {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        value: i64,
    },
    /// List element insertion.
    Insert {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        index: usize,
        value: Mixed,
    },
    /// List element removal.
    Erase {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        index: usize,
    },
    /// List element move.
    Move {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        from: usize,
        to: usize,
    },
    /// List element overwrite.
    SetList {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        index: usize,
        value: Mixed,
    },
    /// Collection cleared.
    Clear {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
    },
    /// A link list entry severed by cascade rather than by user edit.
    LinkListNullify {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        index: usize,
    },
    DictInsert {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        key: Mixed,
        value: Mixed,
    },
    DictErase {
        table: TableKey,
        col: ColKey,
        obj: ObjKey,
        key: Mixed,
    },
    InsertColumn {
        table: TableKey,
        col: ColKey,
    },
    EraseColumn {
        table: TableKey,
        col: ColKey,
    },
}

/// The sink mutations are reported to.
pub trait Replication {
    fn emit(&mut self, instr: Instruction);
}

/// A sink that records every instruction; useful in tests and as the
/// backing for an in-process changeset builder.
#[derive(Debug, Default, Clone)]
pub struct InstructionLog {
    log: std::rc::Rc<std::cell::RefCell<Vec<Instruction>>>,
}

impl InstructionLog {
    pub fn new() -> InstructionLog {
        InstructionLog::default()
    }

    pub fn take(&self) -> Vec<Instruction> {
        std::mem::take(&mut self.log.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }
}

impl Replication for InstructionLog {
    fn emit(&mut self, instr: Instruction) {
        self.log.borrow_mut().push(instr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_shared_between_clones() {
        let log = InstructionLog::new();
        let mut sink = log.clone();
        sink.emit(Instruction::CreateObject {
            table: TableKey::new(1),
            obj: ObjKey::new(2),
        });
        assert_eq!(log.len(), 1);
        let drained = log.take();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_instruction_serde_round_trip() {
        let instr = Instruction::Set {
            table: TableKey::new(1),
            col: ColKey::new(
                ember_types::ColKeyIdx(0),
                ember_types::ColumnType::Int,
                ember_types::ColumnAttrMask::EMPTY,
                0,
            ),
            obj: ObjKey::new(5),
            value: Mixed::Int(9),
        };
        let json = serde_json::to_string(&instr).unwrap();
        let back: Instruction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, instr);
    }
}
