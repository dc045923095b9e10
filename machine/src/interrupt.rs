//! Page-fault information delivered by the trap layer.

bitflags::bitflags! {
    /// Error code pushed by the CPU on a page fault (#PF).
    ///
    /// Together with the faulting address (`cr2`) and the user stack
    /// pointer, this is everything the fault resolver gets to classify a
    /// fault.
    pub struct PFErrorCode: u64 {
        /// The fault was caused by a page-protection violation. When clear,
        /// the page was not present.
        const PRESENT = 1 << 0;
        /// The access causing the fault was a write.
        const WRITE_ACCESS = 1 << 1;
        /// The access happened while the CPU was in user mode.
        const USER = 1 << 2;
        /// A reserved bit was set in a paging-structure entry.
        const RESERVED_WRITE = 1 << 3;
        /// The fault was caused by an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}
