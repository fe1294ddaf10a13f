pub mod assignment_fsm;
pub mod conn;
pub mod handover_fsm;
pub mod procedure;
