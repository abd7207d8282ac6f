use std::sync::Arc;

use rastile::{Error, Rect, TileDataStore, TiledDataManager};

// Common test setup: every test gets its own store so that memory
// accounting is not polluted across tests
fn setup_manager(pixel_size: usize, default_pixel: &[u8]) -> TiledDataManager {
    let store = Arc::new(TileDataStore::new());
    TiledDataManager::with_store(store, pixel_size, default_pixel).unwrap()
}

fn gradient(w: i32, h: i32, pixel_size: usize) -> Vec<u8> {
    let mut data = vec![0u8; (w * h) as usize * pixel_size];
    for y in 0..h {
        for x in 0..w {
            for c in 0..pixel_size {
                data[((y * w + x) as usize) * pixel_size + c] = ((x + y) % 255) as u8;
            }
        }
    }
    data
}

#[test]
fn test_write_read_round_trip() {
    let dm = setup_manager(3, &[0, 0, 0]);
    let data = gradient(100, 80, 3);

    dm.write_bytes(&data, 10, 20, 100, 80).unwrap();

    let mut readback = vec![0u8; data.len()];
    dm.read_bytes(&mut readback, 10, 20, 100, 80).unwrap();
    assert_eq!(readback, data);
}

#[test]
fn test_default_fill_on_fresh_device() {
    let dm = setup_manager(2, &[7, 9]);

    let mut buf = vec![0u8; 50 * 50 * 2];
    dm.read_bytes(&mut buf, -200, 300, 50, 50).unwrap();

    for pixel in buf.chunks_exact(2) {
        assert_eq!(pixel, &[7, 9]);
    }
    // Reads never allocate tiles
    assert_eq!(dm.num_tiles(), 0);
    assert_eq!(dm.extent(), Rect::empty());
}

#[test]
fn test_negative_coordinates() {
    let dm = setup_manager(1, &[0]);
    let data = gradient(50, 50, 1);

    dm.write_bytes(&data, -100, -100, 50, 50).unwrap();

    let mut readback = vec![0u8; data.len()];
    dm.read_bytes(&mut readback, -100, -100, 50, 50).unwrap();
    assert_eq!(readback, data);

    // -100..-51 covers tile columns -2 and -1
    assert!(dm.tile_exists(-2, -2));
    assert!(dm.tile_exists(-1, -1));
    assert!(!dm.tile_exists(0, 0));
}

#[test]
fn test_read_overlapping_written_and_default() {
    let dm = setup_manager(1, &[255]);
    let data = vec![1u8; 64 * 64];
    dm.write_bytes(&data, 0, 0, 64, 64).unwrap();

    // Read a rectangle that hangs off the written tile on all sides
    let mut buf = vec![0u8; 128 * 128];
    dm.read_bytes(&mut buf, -32, -32, 128, 128).unwrap();

    for y in 0..128i32 {
        for x in 0..128i32 {
            let expected = if (32..96).contains(&x) && (32..96).contains(&y) {
                1
            } else {
                255
            };
            assert_eq!(buf[(y * 128 + x) as usize], expected, "at ({}, {})", x, y);
        }
    }
}

#[test]
fn test_set_and_get_pixel() {
    let dm = setup_manager(4, &[0, 0, 0, 0]);

    dm.set_pixel(130, -7, &[1, 2, 3, 4]).unwrap();

    assert_eq!(dm.pixel(130, -7).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(dm.pixel(131, -7).unwrap(), vec![0, 0, 0, 0]);
}

#[test]
fn test_planar_round_trip() {
    let dm = setup_manager(5, &[0; 5]);
    let (w, h) = (70i32, 70i32);
    let num_pixels = (w * h) as usize;

    // 2 + 0 + 1 + 2 bytes per pixel; the zero-size channel is legal
    let channel_sizes = [2usize, 0, 1, 2];
    let planes: Vec<Vec<u8>> = channel_sizes
        .iter()
        .map(|&size| {
            (0..num_pixels * size)
                .map(|i| (i % 251) as u8)
                .collect()
        })
        .collect();
    let plane_refs: Vec<&[u8]> = planes.iter().map(Vec::as_slice).collect();

    dm.write_planar_bytes(&plane_refs, &channel_sizes, 60, 60, w, h)
        .unwrap();

    let readback = dm.read_planar_bytes(&channel_sizes, 60, 60, w, h).unwrap();
    assert_eq!(readback, planes);
}

#[test]
fn test_planar_interleaved_equivalence() {
    let dm = setup_manager(3, &[0; 3]);
    let channel_sizes = [1usize, 1, 1];
    let (w, h) = (10i32, 10i32);
    let num_pixels = (w * h) as usize;

    let planes: Vec<Vec<u8>> = (0..3)
        .map(|c| (0..num_pixels).map(|i| (i + c * 100) as u8).collect())
        .collect();
    let plane_refs: Vec<&[u8]> = planes.iter().map(Vec::as_slice).collect();
    dm.write_planar_bytes(&plane_refs, &channel_sizes, 0, 0, w, h)
        .unwrap();

    let mut interleaved = vec![0u8; num_pixels * 3];
    dm.read_bytes(&mut interleaved, 0, 0, w, h).unwrap();
    for i in 0..num_pixels {
        assert_eq!(interleaved[i * 3], planes[0][i]);
        assert_eq!(interleaved[i * 3 + 1], planes[1][i]);
        assert_eq!(interleaved[i * 3 + 2], planes[2][i]);
    }
}

#[test]
fn test_clear_matches_fresh_device() {
    let dm = setup_manager(2, &[3, 4]);
    let data = gradient(200, 200, 2);
    dm.write_bytes(&data, -50, -50, 200, 200).unwrap();
    assert!(dm.num_tiles() > 0);

    dm.clear();

    assert_eq!(dm.num_tiles(), 0);
    assert_eq!(dm.extent(), Rect::empty());
    let mut buf = vec![0u8; 100 * 100 * 2];
    dm.read_bytes(&mut buf, -50, -50, 100, 100).unwrap();
    for pixel in buf.chunks_exact(2) {
        assert_eq!(pixel, &[3, 4]);
    }
}

#[test]
fn test_clear_rect_hole() {
    let dm = setup_manager(1, &[0]);
    let rect = Rect::new(0, 0, 512, 512);
    let hole = Rect::new(50, 50, 100, 100);

    dm.clear_rect(rect, Some(&[128])).unwrap();
    dm.clear_rect(hole, Some(&[13])).unwrap();

    let mut buf = vec![0u8; (rect.w * rect.h) as usize];
    dm.read_bytes(&mut buf, rect.x, rect.y, rect.w, rect.h).unwrap();
    for y in 0..rect.h {
        for x in 0..rect.w {
            let expected = if hole.contains_point(x, y) { 13 } else { 128 };
            assert_eq!(buf[(y * rect.w + x) as usize], expected, "at ({}, {})", x, y);
        }
    }
}

#[test]
fn test_clear_rect_with_default_unlinks_whole_tiles() {
    let dm = setup_manager(1, &[0]);
    dm.clear_rect(Rect::new(0, 0, 128, 128), Some(&[128])).unwrap();
    assert_eq!(dm.num_tiles(), 4);

    // A full-tile clear back to the default drops the tile instead of
    // keeping an all-default block around
    dm.clear_rect(Rect::new(0, 0, 64, 64), None).unwrap();
    assert_eq!(dm.num_tiles(), 3);
    assert!(!dm.tile_exists(0, 0));

    let mut buf = vec![0u8; 64 * 64];
    dm.read_bytes(&mut buf, 0, 0, 64, 64).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn test_set_extent_shrinks_content() {
    let dm = setup_manager(1, &[0]);
    dm.clear_rect(Rect::new(0, 0, 192, 192), Some(&[77])).unwrap();
    assert_eq!(dm.extent(), Rect::new(0, 0, 192, 192));

    dm.set_extent(Rect::new(64, 64, 64, 64)).unwrap();

    assert_eq!(dm.extent(), Rect::new(64, 64, 64, 64));
    let mut buf = vec![0u8; 192 * 192];
    dm.read_bytes(&mut buf, 0, 0, 192, 192).unwrap();
    for y in 0..192i32 {
        for x in 0..192i32 {
            let inside = (64..128).contains(&x) && (64..128).contains(&y);
            let expected = if inside { 77 } else { 0 };
            assert_eq!(buf[(y * 192 + x) as usize], expected, "at ({}, {})", x, y);
        }
    }
}

#[test]
fn test_set_extent_grow_is_noop() {
    let dm = setup_manager(1, &[0]);
    dm.clear_rect(Rect::new(0, 0, 64, 64), Some(&[1])).unwrap();
    let before = dm.extent();

    dm.set_extent(Rect::new(-100, -100, 1000, 1000)).unwrap();

    assert_eq!(dm.extent(), before);
    assert!(dm.tile_exists(0, 0));
}

#[test]
fn test_bad_buffer_sizes_are_rejected() {
    let dm = setup_manager(4, &[0; 4]);

    let short = vec![0u8; 10];
    assert!(matches!(
        dm.write_bytes(&short, 0, 0, 10, 10),
        Err(Error::BadBufferSize { .. })
    ));

    let mut buf = vec![0u8; 10];
    assert!(matches!(
        dm.read_bytes(&mut buf, 0, 0, 10, 10),
        Err(Error::BadBufferSize { .. })
    ));

    // Channel sizes must add up to the pixel size
    assert!(matches!(
        dm.read_planar_bytes(&[1, 1], 0, 0, 4, 4),
        Err(Error::BadChannelSizes { .. })
    ));

    let plane = vec![0u8; 16];
    assert!(matches!(
        dm.write_planar_bytes(&[&plane], &[2, 2], 0, 0, 4, 4),
        Err(Error::BadPlaneCount { .. })
    ));
}

#[test]
fn test_negative_dimensions_read_as_empty() {
    let dm = setup_manager(1, &[0]);
    // Negative width/height clamp to zero, so an empty buffer matches
    let empty: [u8; 0] = [];
    dm.write_bytes(&empty, 5, 5, -3, 10).unwrap();
    let mut buf: [u8; 0] = [];
    dm.read_bytes(&mut buf, 5, 5, 10, -1).unwrap();
    assert_eq!(dm.num_tiles(), 0);
}

#[test]
fn test_concurrent_disjoint_writers() {
    let dm = Arc::new(setup_manager(1, &[0]));
    let mut handles = Vec::new();

    for i in 0..4i32 {
        let dm = dm.clone();
        handles.push(std::thread::spawn(move || {
            let data = vec![(i + 1) as u8; 128 * 128];
            dm.write_bytes(&data, i * 512, 0, 128, 128).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..4i32 {
        let mut buf = vec![0u8; 128 * 128];
        dm.read_bytes(&mut buf, i * 512, 0, 128, 128).unwrap();
        assert!(buf.iter().all(|&b| b == (i + 1) as u8));
    }
}
