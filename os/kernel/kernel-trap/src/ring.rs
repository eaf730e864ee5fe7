/// CPU privilege rings (0–3).
///
/// The **Current Privilege Level** (CPL) of interrupted code is the low two
/// bits of the code-segment selector saved in its trap frame.
///
/// | Ring | Typical Use |
/// |------|-------------|
/// | **Ring 0** | Kernel / supervisor mode |
/// | **Ring 1** | Unused |
/// | **Ring 2** | Unused |
/// | **Ring 3** | User-mode execution contexts |
///
/// Page-table permissions only distinguish supervisor (rings 0–2) from user
/// (ring 3) accesses.
///
/// See also: Intel SDM Vol. 3A, §5.5 "Privilege Levels".
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Ring {
    /// Kernel or supervisor mode; a fault here is a kernel bug.
    Ring0 = 0,
    Ring1 = 1,
    Ring2 = 2,
    /// User mode.
    Ring3 = 3,
}

impl Ring {
    /// The requested privilege level carried in a segment selector.
    #[inline]
    #[must_use]
    pub const fn of_selector(selector: u16) -> Self {
        match selector & 0b11 {
            0 => Self::Ring0,
            1 => Self::Ring1,
            2 => Self::Ring2,
            _ => Self::Ring3,
        }
    }

    #[inline]
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether code at this ring runs with kernel privilege.
    #[inline]
    #[must_use]
    pub const fn is_kernel(self) -> bool {
        matches!(self, Self::Ring0)
    }
}

impl From<Ring> for u8 {
    #[inline]
    fn from(r: Ring) -> Self {
        r.to_u8()
    }
}

impl TryFrom<u8> for Ring {
    type Error = u8;

    #[inline]
    fn try_from(r: u8) -> Result<Self, Self::Error> {
        if r <= 3 {
            Ok(Self::of_selector(u16::from(r)))
        } else {
            Err(r)
        }
    }
}
