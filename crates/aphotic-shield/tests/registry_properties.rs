use aphotic_shield::{Access, GuardRegistry, ViolationKind};
use proptest::prelude::*;

const GUARD: u64 = 16;
const STRIDE: u64 = 0x1000;

proptest! {
    /// Any access fully inside a live body passes; any access running past
    /// its end is an overflow, however far past the guard span it lands.
    #[test]
    fn prop_bounds(size in 1u64..512, offset in 0u64..8192, width in 1u64..9) {
        let registry = GuardRegistry::new(GUARD);
        let base = 0x10_0000;
        registry.own(base - STRIDE..base + 4 * STRIDE);
        registry.register(base, size);

        let address = base + offset;
        let result = registry.check(address, width, Access::Load);
        if offset + width <= size {
            prop_assert!(result.is_ok());
        } else {
            prop_assert_eq!(result.unwrap_err().kind, ViolationKind::BufferOverflow);
        }
    }

    /// Outside owned memory only the guard spans are checked.
    #[test]
    fn prop_unowned_guards(size in 1u64..512, offset in 0u64..512, width in 1u64..9) {
        let registry = GuardRegistry::new(GUARD);
        let base = 0x10_0000;
        registry.register(base, size);

        let result = registry.check(base + offset, width, Access::Load);
        if offset + width <= size {
            prop_assert!(result.is_ok());
        } else if offset < size + GUARD {
            prop_assert_eq!(result.unwrap_err().kind, ViolationKind::BufferOverflow);
        } else {
            prop_assert!(result.is_ok());
        }
    }

    /// Any access below the body inside owned memory is an underflow.
    #[test]
    fn prop_underflow(size in 1u64..512, before in 8u64..4096, width in 1u64..9) {
        let registry = GuardRegistry::new(GUARD);
        let base = 0x10_0000;
        registry.own(base - STRIDE..base + STRIDE);
        registry.register(base, size);
        prop_assert_eq!(
            registry.check(base - before, width, Access::Store).unwrap_err().kind,
            ViolationKind::BufferUnderflow
        );
    }

    /// After release, every byte of the body reports use after free and
    /// a second release is a double free.
    #[test]
    fn prop_release(size in 1u64..256, offset in 0u64..256) {
        prop_assume!(offset < size);
        let registry = GuardRegistry::new(GUARD);
        let base = 0x20_0000;
        registry.register(base, size);
        prop_assert!(registry.release(base).is_ok());
        prop_assert_eq!(
            registry.check(base + offset, 1, Access::Store).unwrap_err().kind,
            ViolationKind::UseAfterFree
        );
        prop_assert_eq!(registry.release(base).unwrap_err().kind, ViolationKind::DoubleFree);
    }

    /// With many disjoint regions, an access is attributed to the region it
    /// touches and never to a neighbour.
    #[test]
    fn prop_many_regions(
        sizes in prop::collection::vec(1u64..256, 1..16),
        pick in any::<prop::sample::Index>(),
        offset in 0u64..512,
    ) {
        let registry = GuardRegistry::new(GUARD);
        for (i, size) in sizes.iter().enumerate() {
            registry.register(STRIDE * (i as u64 + 1), *size);
        }
        let i = pick.index(sizes.len());
        let base = STRIDE * (i as u64 + 1);
        let offset = offset % (sizes[i] + GUARD);
        let result = registry.check(base + offset, 1, Access::Load);
        prop_assert_eq!(result.is_ok(), offset < sizes[i]);
    }
}
