// Headless frame loop demo
// Streams two synthetic tiles into a primitive backed by the CPU sorter/encoder,
// orbits the camera, selects a patch and prints what each stage produced.
//
// Run: cargo run --example headless_frame_loop

use std::time::{Duration, Instant};

use glam::{Mat4, Vec3};
use rfs_gsplat_tiles::*;

/// Owned buffers for one synthetic tile: a `side` x `side` patch on the x/y plane
struct SyntheticTile {
    id: TileId,
    positions: Vec<f32>,
    rotations: Vec<f32>,
    scales: Vec<f32>,
    colors: Vec<u8>,
    original_ids: Vec<u32>,
}

impl SyntheticTile {
    fn patch(id: u64, side: usize, origin: Vec3, first_id: u32) -> Self {
        let n = side * side;
        let mut positions = Vec::with_capacity(n * 3);
        let mut colors = Vec::with_capacity(n * 4);
        for y in 0..side {
            for x in 0..side {
                let p = origin + Vec3::new(x as f32 * 0.1, y as f32 * 0.1, ((x + y) % 7) as f32 * 0.05);
                positions.extend_from_slice(&p.to_array());
                colors.extend_from_slice(&[(x * 255 / side) as u8, (y * 255 / side) as u8, 180, 255]);
            }
        }

        Self {
            id: TileId(id),
            positions,
            rotations: [0.0, 0.0, 0.0, 1.0].repeat(n),
            scales: [0.04, 0.04, 0.01].repeat(n),
            colors,
            original_ids: (first_id..first_id + n as u32).collect(),
        }
    }

    fn tile(&self) -> TileSplats<'_> {
        TileSplats::new(self.id, &self.positions, &self.rotations, &self.scales, &self.colors)
            .with_original_ids(&self.original_ids)
    }
}

fn orbit(angle: f32) -> Mat4 {
    let eye = Vec3::new(angle.cos() * 12.0, angle.sin() * 12.0, 6.0);
    Mat4::look_at_rh(eye, Vec3::new(5.0, 2.5, 0.0), Vec3::Z)
}

fn main() {
    let data = [
        SyntheticTile::patch(1, 50, Vec3::ZERO, 0),
        SyntheticTile::patch(2, 50, Vec3::new(5.0, 0.0, 0.0), 10_000),
    ];
    let tiles: Vec<TileSplats<'_>> = data.iter().map(SyntheticTile::tile).collect();

    let config = PrimitiveConfig::editing().with_outline(OutlineSettings::rings());
    let mut primitive = GaussianSplatPrimitive::with_cpu_services(config);

    println!("=== Headless frame loop ===");
    let start = Instant::now();
    let mut sorted_frames = 0;

    for frame in 0..240 {
        // Camera moves for the first 120 frames, then holds still
        let angle = (frame.min(120) as f32) * 0.01;
        let input = FrameInput::new(orbit(angle));

        match primitive.update(&input, &tiles) {
            Ok(output) => {
                if output.aggregated {
                    println!("frame {frame}: aggregated {} splats", primitive.num_splats());
                }
                if output.encoded {
                    let encoded = primitive.encoded_splats().map(|e| (e.width, e.height));
                    println!("frame {frame}: encoded texture {:?}", encoded);
                }
                if output.draw_order_updated {
                    sorted_frames += 1;
                }
            }
            Err(e) => {
                println!("frame {frame}: {e}");
                break;
            }
        }

        if frame == 60 {
            // Select the first tile by its source ids
            let report = primitive.set_splat_selection_by_original_id(0..2500, true);
            println!("frame {frame}: selected {} splats ({} rejected)", report.applied, report.rejected);
            primitive.set_splat_color_group(0u32..100, 3);
        }

        std::thread::sleep(Duration::from_millis(2));
    }

    let stats = primitive.outline_boundary_stats();
    println!(
        "outline: {} of {} selected splats get rings (cell size {:.3}, {} cells, fallback: {})",
        stats.boundary_count, stats.selected_count, stats.cell_size, stats.grid_cell_count, stats.fallback
    );

    let sort = primitive.sort_stats();
    println!(
        "sorts: {} submitted, {} completed, {} adopted, idle ratio {:.1}%",
        sort.submissions,
        sort.completed,
        sorted_frames,
        sort.idle_ratio() * 100.0
    );
    sort.print_summary();
    println!("done in {:.2?}", start.elapsed());
}
