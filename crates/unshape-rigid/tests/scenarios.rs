//! End-to-end scenarios for the world, grid, pool and contact solver.

use glam::{Mat3, Vec3};
use unshape_rigid::{
    Activity, BroadBounds, BroadEntry, CollisionShape, ConstraintSolver, ContactPart,
    ContactPoint, ContactSettings, GridConfig, GridRegionManager, LineBuffer, ObjectId, Physics,
    PhysicsWorld, Plane, Pool, PoolError, RegionManager, RigidBody, ShapeType, SolverBody,
    StepContext,
};

fn unit_ball(position: Vec3) -> RigidBody {
    let shape = CollisionShape::sphere(1.0).unwrap();
    let mut mass = shape.compute_mass_info();
    mass *= 1.0 / mass.mass;
    RigidBody::new(shape, mass).unwrap().with_position(position)
}

#[test]
fn two_resting_spheres_produce_one_batch() {
    let config = Physics::default().with_gravity(Vec3::new(0.0, -9.8, 0.0));
    let mut world = PhysicsWorld::new(config).unwrap();
    let lower = world.add_rigid_body(unit_ball(Vec3::ZERO));
    let upper = world.add_rigid_body(unit_ball(Vec3::new(0.0, 2.01, 0.0)));
    assert_eq!(world.body(lower).unwrap().mass(), 1.0);

    let stats = world.step();
    assert_eq!(stats.pairs, 1);
    assert_eq!(stats.contacts, 1);
    assert_eq!(stats.batches, 1);

    // Normal points from the lower sphere to the upper one.
    let relative = world.body(upper).unwrap().velocity() - world.body(lower).unwrap().velocity();
    assert!(relative.y >= -1e-4, "approaching at {}", relative.y);
}

#[test]
fn ground_plane_owns_straddling_cells_only() {
    let config = GridConfig {
        origin: Vec3::new(-128.0, -36.0, -16.0),
        cells: [32, 9, 4],
        cell_size: 8.0,
    };
    let mut grid = GridRegionManager::new(&config).unwrap();
    let ground = ObjectId::from_raw(0, 0);
    let regions = grid.on_object_added(&BroadEntry {
        id: ground,
        shape: ShapeType::InfinitePlane,
        activity: Activity::Static,
        bounds: BroadBounds::Plane(Plane::new(Vec3::Y, 0.0).unwrap()),
    });

    assert_eq!(regions.len(), 32 * 4);
    for region in grid.regions() {
        let bounds = region.bounds();
        let straddles = bounds.min.y <= 0.0 && bounds.max.y >= 0.0;
        assert_eq!(region.owns(ground), straddles, "{bounds:?}");
        assert_eq!(regions.contains(region.id()), straddles);
    }
}

#[test]
fn delete_through_foreign_allocator_fails() {
    let mut a: Pool<ContactPoint> = Pool::new();
    let mut b: Pool<ContactPoint> = Pool::new();
    let (p, _) = a.allocate();
    b.allocate();

    let err = b.delete(p).unwrap_err();
    assert_eq!(
        err,
        PoolError::AllocatorNotFound {
            handle: a.id().get(),
            allocator: b.id().get(),
        }
    );
    assert!(a.owns(p));
    assert_eq!(a.live_count(), 1);
    assert_eq!(b.live_count(), 1);

    a.delete(p).unwrap();
    assert_eq!(a.delete(p).unwrap_err(), PoolError::DoubleFree(p.index()));
}

#[test]
fn contact_impulse_is_equal_and_opposite() {
    let ctx = StepContext {
        dt: 1.0 / 60.0,
        gravity: Vec3::new(0.0, -9.8, 0.0),
        contact: ContactSettings::default(),
    };
    let body = |i: u32, mass: f32, com: Vec3, velocity: Vec3| SolverBody {
        com,
        velocity,
        inv_mass: 1.0 / mass,
        inv_moi: Mat3::IDENTITY * (2.5 / mass),
        merges: true,
        ..SolverBody::fixed(ObjectId::from_raw(i, 0))
    };
    let mut a = body(0, 1.0, Vec3::ZERO, Vec3::new(0.5, 3.0, 0.0));
    let mut b = body(1, 2.0, Vec3::new(0.0, 1.9, 0.0), Vec3::new(0.0, -1.0, 0.0));
    let (before_a, before_b) = (a, b);

    let contact_point = Vec3::new(0.0, 0.95, 0.0);
    let mut contact = ContactPoint::new(
        a.id,
        b.id,
        ContactPart {
            pos: contact_point,
            norm: Vec3::Y,
        },
        ContactPart {
            pos: contact_point,
            norm: -Vec3::Y,
        },
        (0.5, 0.5),
        (0.6, 0.6),
    );
    contact.do_update(&a, &b, &ctx);
    assert!(contact.do_constraint(&mut a, &mut b, &ctx));

    let dp_a = (a.velocity - before_a.velocity) / a.inv_mass;
    let dp_b = (b.velocity - before_b.velocity) / b.inv_mass;
    assert!((dp_a + dp_b).length() < 1e-4, "{dp_a} vs {dp_b}");

    let report = contact.take_report().unwrap();
    assert!((report.impulse - dp_a).length() < 1e-4);
    assert!(dp_a.y < 0.0);
    // Friction opposes the sideways slip of A.
    assert!(dp_a.x < 0.0);
}

#[test]
fn bouncing_ball_settles_and_sleeps() {
    let mut world = PhysicsWorld::new(Physics::default()).unwrap();
    world.add_rigid_body(RigidBody::new_static(CollisionShape::ground(), Vec3::ZERO));
    let ball = world.add_rigid_body(unit_ball(Vec3::new(0.0, 4.0, 0.0)).with_restitution(0.5));

    let mut slept = 0;
    for _ in 0..600 {
        slept += world.step().slept;
    }
    let body = world.body(ball).unwrap();
    assert!(slept >= 1);
    assert!(!body.is_active());
    assert!(body.position().y > 0.8 && body.position().y < 1.2);
}

#[test]
fn mesh_box_rests_on_ground() {
    let mut world = PhysicsWorld::new(Physics::default()).unwrap();
    world.add_rigid_body(RigidBody::new_static(CollisionShape::ground(), Vec3::ZERO));
    let cube = CollisionShape::TriangleMesh(unshape_rigid::TriangleMesh::cuboid(Vec3::splat(0.5)));
    let cube = world.add_rigid_body(
        RigidBody::dynamic(cube, 1.0, Vec3::new(0.0, 2.0, 0.0)).with_restitution(0.0),
    );
    for _ in 0..240 {
        world.step();
    }
    let y = world.body(cube).unwrap().position().y;
    assert!(y > 0.3 && y < 0.7, "cube at {y}");
}

#[test]
fn debug_draw_covers_objects_and_regions() {
    let mut world = PhysicsWorld::new(Physics::default()).unwrap();
    world.add_rigid_body(unit_ball(Vec3::ZERO));

    let mut bodies_only = LineBuffer::default();
    world.debug_draw(&mut bodies_only, false);
    assert!(!bodies_only.lines.is_empty());

    let mut with_regions = LineBuffer::default();
    world.debug_draw(&mut with_regions, true);
    assert!(with_regions.lines.len() > bodies_only.lines.len());
}
