use super::*;
use crate::device::HostDevice;

fn allocated(device: &mut HostDevice, size: u64, usage: BufferUsage) -> BufferStore {
    let mut store = BufferStore::new(BufferKind::Vertex);
    store.alloc(device, None, size, usage).unwrap();
    store
}

#[test]
fn test_alloc_with_data_uploads() {
    let mut device = HostDevice::default();
    let mut store = BufferStore::new(BufferKind::Index);
    let data: Vec<u8> = (0..40).collect();
    store
        .alloc(&mut device, Some(&data), 40, BufferUsage::Static)
        .unwrap();

    assert!(store.is_allocated());
    assert!(store.owns_buffer());
    assert_eq!(store.size(), 40);
    assert_eq!(store.allocated_size(), 48);

    let native = store.native().unwrap();
    assert_eq!(&device.buffer_bytes(native.buffer).unwrap()[..40], &data[..]);
    store.free(&mut device);
}

#[test]
fn test_alloc_rejects_zero_and_double_alloc() {
    let mut device = HostDevice::default();
    let mut store = BufferStore::new(BufferKind::Vertex);
    assert_eq!(
        store.alloc(&mut device, None, 0, BufferUsage::Dynamic),
        Err(BufferError::InvalidSize)
    );
    store.alloc(&mut device, None, 64, BufferUsage::Dynamic).unwrap();
    assert_eq!(
        store.alloc(&mut device, None, 64, BufferUsage::Dynamic),
        Err(BufferError::AlreadyAllocated)
    );
    store.free(&mut device);
}

#[test]
fn test_update_overrun_and_alignment() {
    let mut device = HostDevice::default();
    let mut store = allocated(&mut device, 64, BufferUsage::Dynamic);

    assert!(matches!(
        store.update(&mut device, &[0; 32], 48),
        Err(BufferError::SizeOverrun { .. })
    ));
    assert_eq!(
        store.update(&mut device, &[0; 4], 8),
        Err(BufferError::MisalignedOffset(8))
    );
    store.update(&mut device, &[7; 16], 48).unwrap();
    store.free(&mut device);
}

#[test]
fn test_static_buffer_cannot_be_mapped_but_can_be_updated() {
    let mut device = HostDevice::default();
    let mut store = allocated(&mut device, 32, BufferUsage::Static);

    assert_eq!(
        store.map_buffer(&mut device).map(|_| ()),
        Err(BufferError::MapStatic)
    );
    store.update(&mut device, &[9; 32], 0).unwrap();
    let native = store.native().unwrap();
    assert!(device.buffer_bytes(native.buffer).unwrap()[..32].iter().all(|b| *b == 9));
    store.free(&mut device);
}

#[test]
fn test_map_and_unmap() {
    let mut device = HostDevice::default();
    let mut store = allocated(&mut device, 32, BufferUsage::Dynamic);

    store.map_buffer(&mut device).unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
    assert!(store.is_mapped());
    assert_eq!(
        store.map_buffer(&mut device).map(|_| ()),
        Err(BufferError::AlreadyMapped)
    );
    store.unmap_buffer(&mut device).unwrap();
    assert_eq!(store.unmap_buffer(&mut device), Err(BufferError::NotMapped));

    let native = store.native().unwrap();
    assert_eq!(&device.buffer_bytes(native.buffer).unwrap()[..4], &[1, 2, 3, 4]);
    store.free(&mut device);
}

#[test]
fn test_reference_range_shares_storage() {
    let mut device = HostDevice::default();
    let mut owner = allocated(&mut device, 256, BufferUsage::Dynamic);

    let mut reference = BufferStore::new(BufferKind::Vertex);
    reference
        .reference_range(&mut device, &owner, 64, 32)
        .unwrap();
    assert!(!reference.owns_buffer());
    assert_eq!(reference.offset(), 64);
    assert_eq!(reference.size(), 32);
    assert_eq!(reference.native(), owner.native());

    reference.update(&mut device, &[5; 32], 0).unwrap();
    let native = owner.native().unwrap();
    assert!(device.buffer_bytes(native.buffer).unwrap()[64..96].iter().all(|b| *b == 5));

    // Freeing the reference leaves the owner's buffer alive.
    reference.free(&mut device);
    assert!(!reference.is_allocated());
    assert!(device.is_buffer_live(native.buffer));
    assert_eq!(device.buffers_destroyed(), 0);

    owner.free(&mut device);
    assert!(!device.is_buffer_live(native.buffer));
}

#[test]
fn test_reference_out_of_range() {
    let mut device = HostDevice::default();
    let mut owner = allocated(&mut device, 64, BufferUsage::Dynamic);
    let mut reference = BufferStore::new(BufferKind::Vertex);

    assert!(matches!(
        reference.reference_range(&mut device, &owner, 48, 32),
        Err(BufferError::ReferenceOutOfRange { .. })
    ));
    reference.reference(&mut device, &owner).unwrap();
    assert_eq!(reference.size(), 64);
    owner.free(&mut device);
}

#[test]
fn test_reference_frees_previous_owned_buffer() {
    let mut device = HostDevice::default();
    let mut owner = allocated(&mut device, 64, BufferUsage::Dynamic);
    let mut other = allocated(&mut device, 64, BufferUsage::Dynamic);
    let previous = other.native().unwrap();

    other.reference(&mut device, &owner).unwrap();
    assert!(!device.is_buffer_live(previous.buffer));
    assert_eq!(device.live_buffer_count(), 1);
    owner.free(&mut device);
}

#[test]
fn test_reference_while_mapped_rejected() {
    let mut device = HostDevice::default();
    let mut owner = allocated(&mut device, 64, BufferUsage::Dynamic);
    let mut mapped = allocated(&mut device, 64, BufferUsage::Dynamic);
    mapped.map_buffer(&mut device).unwrap();

    assert_eq!(
        mapped.reference(&mut device, &owner),
        Err(BufferError::ReferenceWhileMapped)
    );

    // free() unmaps before destroying.
    let native = mapped.native().unwrap();
    mapped.free(&mut device);
    assert!(!device.is_buffer_live(native.buffer));
    owner.free(&mut device);
}

#[test]
fn test_sub_range_and_view() {
    let mut device = HostDevice::default();
    let mut owner = allocated(&mut device, 128, BufferUsage::Dynamic);
    let sub = BufferStore::sub_range(&owner, 32, 64).unwrap();
    let view = sub.view().unwrap();
    assert_eq!(view.offset, 32);
    assert_eq!(view.size, 64);
    assert_eq!(view.owner, owner.native().unwrap());

    let nested = BufferStore::sub_range(&sub, 16, 16).unwrap();
    assert_eq!(nested.offset(), 48);
    owner.free(&mut device);
}

#[test]
fn test_align_up() {
    assert_eq!(align_up(0, 16), 0);
    assert_eq!(align_up(1, 16), 16);
    assert_eq!(align_up(32, 32), 32);
    assert_eq!(align_up(33, 32), 64);
}
