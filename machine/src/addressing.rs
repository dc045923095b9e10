//! Physical and virtual addresses.
//!
//! Frames handed out by the page allocator and addresses touched by user
//! processes are both integers underneath. Each gets its own wrapper so a
//! frame can never be used where a page address is expected:
//!
//! - [`Pa`]: a physical address. A frame is named by its page-aligned `Pa`.
//! - [`Va`]: a canonical 48-bit virtual address. The lower half
//!   (`0 .. USER_TOP`) belongs to user processes, the upper half to the
//!   kernel.

/// Bytes per page.
pub const PAGE_SIZE: usize = 0x1000;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: usize = 12;

/// In-page offset bits.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// First address past the user half of the address space.
pub const USER_TOP: usize = 0x0000_8000_0000_0000;

// Bits 47..64 of a canonical address are copies of bit 47.
const SIGN_EXTENSION: usize = 0xffff_8000_0000_0000;

/// A physical address.
///
/// Only used to name frames and to index physical memory; never
/// dereferenced.
#[repr(transparent)]
#[derive(Clone, Copy, Hash, PartialEq, Eq, Ord, PartialOrd)]
pub struct Pa(usize);

impl Pa {
    /// Wraps `addr`, or `None` past the 52-bit physical address space.
    pub const fn new(addr: usize) -> Option<Self> {
        if addr >> 52 == 0 { Some(Self(addr)) } else { None }
    }
}

/// A virtual address.
///
/// ```
/// use machine::addressing::Va;
///
/// let va = Va::new(0x4000_1234).unwrap();
/// assert_eq!(va.page_down().into_usize(), 0x4000_1000);
/// assert_eq!(va.offset(), 0x234);
/// assert!(Va::new(0x0000_8000_0000_0000).is_none());
/// ```
#[repr(transparent)]
#[derive(Clone, Copy, Hash, PartialEq, Eq, Ord, PartialOrd)]
pub struct Va(usize);

impl Va {
    /// Address zero.
    pub const NULL: Va = Va(0);

    /// Wraps `addr` if it is canonical.
    pub const fn new(addr: usize) -> Option<Self> {
        let high = addr & SIGN_EXTENSION;
        if high == 0 || high == SIGN_EXTENSION {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// True for page-aligned addresses.
    pub const fn is_aligned(self) -> bool {
        self.offset() == 0
    }

    /// True for address zero.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// True for non-null addresses in the user half.
    pub const fn is_user(self) -> bool {
        !self.is_null() && self.0 < USER_TOP
    }
}

macro_rules! address {
    ($t: ident) => {
        impl $t {
            /// The raw address.
            #[inline]
            pub const fn into_usize(self) -> usize {
                self.0
            }

            /// The start of the page holding this address.
            #[inline]
            pub const fn page_down(self) -> Self {
                Self(self.0 & !PAGE_MASK)
            }

            /// The first page boundary at or above this address.
            #[inline]
            pub const fn page_up(self) -> Self {
                Self(self.0.next_multiple_of(PAGE_SIZE))
            }

            /// The offset of this address within its page.
            #[inline]
            pub const fn offset(self) -> usize {
                self.0 & PAGE_MASK
            }
        }

        impl core::ops::Add<usize> for $t {
            type Output = Self;

            fn add(self, bytes: usize) -> Self {
                Self(self.0 + bytes)
            }
        }

        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, bytes: usize) {
                self.0 += bytes;
            }
        }

        impl core::ops::Sub<usize> for $t {
            type Output = Self;

            fn sub(self, bytes: usize) -> Self {
                Self(self.0 - bytes)
            }
        }

        /// Distance in bytes.
        impl core::ops::Sub for $t {
            type Output = usize;

            fn sub(self, base: Self) -> usize {
                self.0 - base.0
            }
        }

        impl core::fmt::Debug for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($t), "({:#x})"), self.0)
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Debug::fmt(self, f)
            }
        }
    };
}

address!(Pa);
address!(Va);
