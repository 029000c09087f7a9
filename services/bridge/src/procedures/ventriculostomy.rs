//! services/bridge/src/procedures/ventriculostomy.rs
//!
//! External ventricular drain placement. The peer positions a drill over a
//! drill site, drills a burr hole, then inserts a catheter into the lateral
//! ventricle and secures it.
//!
//! Scene coordinates are millimeters: +X patient right, +Y anterior, +Z superior.

use neuro_surgery_core::{
    ActionInvocation, ActionOutcome, ActionSpec, Completion, ForceRequest, MovementKind,
    OperationOutcome, OperationRequest, Phase, PhaseEntry, PortResult, Pose, Procedure, Quat,
    Scene, Vec3,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

//=========================================================================================
// Constants
//=========================================================================================

const DRILL: &str = "drill";
const CATHETER: &str = "catheter";

const CRANIAL_ACCESS: &str = "cranial_access";
const CATHETER_PLACEMENT: &str = "catheter_placement";

/// Drill travel between sites, mm/s.
const DRILL_TRAVEL_SPEED: f64 = 20.0;
/// deg/s
const PIVOT_SPEED: f64 = 30.0;
/// Drill advance through bone, mm/s.
const DRILL_ADVANCE_SPEED: f64 = 2.0;
const BURR_HOLE_DEPTH: f64 = 8.0;
const CATHETER_SPEED: f64 = 5.0;

const MAX_TRAVEL: f64 = 100.0;
const MAX_PIVOT: f64 = 90.0;
const MAX_INSERTION_DEPTH: f64 = 80.0;
/// How close the drill tip must be to a landmark to count as on the site.
const SITE_TOLERANCE: f64 = 2.0;

const VENTRICLE: &str = "lateral_ventricle";
const SINUS: &str = "superior_sagittal_sinus";

pub const UNKNOWN_SITE_MESSAGE: &str = "Doctor, I don't know what that drill site location is";

struct DrillSite {
    key: &'static str,
    display: &'static str,
    position: Vec3,
}

static DRILL_SITES: [DrillSite; 4] = [
    DrillSite {
        key: "bregma",
        display: "bregma",
        position: Vec3::new(0.0, 0.0, 85.0),
    },
    DrillSite {
        key: "kochers_point",
        display: "Kocher's point",
        position: Vec3::new(25.0, 10.0, 82.0),
    },
    DrillSite {
        key: "frazier_point",
        display: "Frazier's point",
        position: Vec3::new(30.0, -65.0, 60.0),
    },
    DrillSite {
        key: "keens_point",
        display: "Keen's point",
        position: Vec3::new(35.0, -30.0, 45.0),
    },
];

const DRILL_HOME: Vec3 = Vec3::new(0.0, 60.0, 110.0);
const CATHETER_HOME: Vec3 = Vec3::new(60.0, 60.0, 110.0);

//=========================================================================================
// Action Parameters
//=========================================================================================

#[derive(Deserialize, Debug)]
struct MoveToSiteParams {
    location: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum MoveDirection {
    Left,
    Right,
    Forward,
    Backward,
}

impl MoveDirection {
    fn name(self) -> &'static str {
        match self {
            MoveDirection::Left => "left",
            MoveDirection::Right => "right",
            MoveDirection::Forward => "forward",
            MoveDirection::Backward => "backward",
        }
    }

    fn vector(self) -> Vec3 {
        match self {
            MoveDirection::Left => Vec3::new(-1.0, 0.0, 0.0),
            MoveDirection::Right => Vec3::X,
            MoveDirection::Forward => Vec3::Y,
            MoveDirection::Backward => Vec3::new(0.0, -1.0, 0.0),
        }
    }
}

#[derive(Deserialize, Debug)]
struct MoveDrillParams {
    distance: f64,
    direction: MoveDirection,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum PivotDirection {
    Left,
    Right,
    Up,
    Down,
}

impl PivotDirection {
    fn name(self) -> &'static str {
        match self {
            PivotDirection::Left => "left",
            PivotDirection::Right => "right",
            PivotDirection::Up => "up",
            PivotDirection::Down => "down",
        }
    }

    fn rotation(self, degrees: f64) -> Quat {
        match self {
            PivotDirection::Up => Quat::from_axis_angle(Vec3::X, degrees),
            PivotDirection::Down => Quat::from_axis_angle(Vec3::X, -degrees),
            PivotDirection::Left => Quat::from_axis_angle(Vec3::Y, -degrees),
            PivotDirection::Right => Quat::from_axis_angle(Vec3::Y, degrees),
        }
    }
}

#[derive(Deserialize, Debug)]
struct PivotDrillParams {
    angle: f64,
    direction: PivotDirection,
}

#[derive(Deserialize, Debug)]
struct InsertCatheterParams {
    depth: f64,
}

/// Parses handler parameters into a friendly failure message on error.
fn parse_params<T: DeserializeOwned>(action: &str, params: &str) -> Result<T, ActionOutcome> {
    if params.trim().is_empty() {
        return Err(ActionOutcome::fail(
            "Doctor, you didn't give me any details for that instruction",
        ));
    }
    serde_json::from_str(params).map_err(|e| {
        warn!("Malformed parameters for {}: {}", action, e);
        ActionOutcome::fail("Doctor, I couldn't understand the details of that instruction")
    })
}

//=========================================================================================
// Procedure State
//=========================================================================================

#[derive(Debug, Clone)]
struct BurrHole {
    site: &'static str,
    /// Pose of the drill tip at the bone surface when drilling started.
    entry: Pose,
    breached_sinus: bool,
}

#[derive(Debug, Default)]
pub struct Ventriculostomy {
    drill_site: Option<&'static str>,
    drilling_from: Option<Pose>,
    burr_holes: Vec<BurrHole>,
    catheter_entry: Option<Pose>,
    tip_in_ventricle: bool,
    placement_verified: bool,
    secured: bool,
}

impl Ventriculostomy {
    pub fn new() -> Self {
        Self::default()
    }

    fn site(key: &str) -> Option<&'static DrillSite> {
        DRILL_SITES.iter().find(|site| site.key == key)
    }

    fn display(key: &str) -> &'static str {
        Self::site(key).map_or("an unknown site", |site| site.display)
    }

    /// The drill site the tip is resting on, if any.
    fn site_near(scene: &dyn Scene, position: Vec3) -> Option<&'static str> {
        DRILL_SITES
            .iter()
            .find(|site| {
                scene
                    .landmark(site.key)
                    .is_some_and(|landmark| landmark.distance(position) <= SITE_TOLERANCE)
            })
            .map(|site| site.key)
    }

    fn hole_at(&self, site: &str) -> Option<&BurrHole> {
        self.burr_holes.iter().find(|hole| hole.site == site)
    }

    fn catheter_depth(&self, scene: &dyn Scene) -> f64 {
        match (self.catheter_entry, scene.pose(CATHETER)) {
            (Some(entry), Ok(pose)) => entry.position.distance(pose.position),
            _ => 0.0,
        }
    }

    //=====================================================================================
    // Cranial Access Handlers
    //=====================================================================================

    fn move_to_drill_site(&mut self, params: &str, scene: &dyn Scene) -> ActionOutcome {
        let params: MoveToSiteParams = match parse_params("move_to_drill_site", params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let key = params
            .location
            .trim()
            .to_lowercase()
            .replace('\'', "")
            .replace([' ', '-'], "_");

        let (Some(site), Some(target)) = (Self::site(&key), scene.landmark(&key)) else {
            return ActionOutcome::fail(UNKNOWN_SITE_MESSAGE);
        };
        let Ok(current) = scene.pose(DRILL) else {
            return ActionOutcome::fail("Doctor, I can't find the drill");
        };

        ActionOutcome::started(
            format!("Moving the drill to {}", site.display),
            OperationRequest {
                tool: DRILL.to_string(),
                kind: MovementKind::Translate,
                target: Pose::new(target, current.orientation),
                speed: DRILL_TRAVEL_SPEED,
            },
        )
    }

    fn move_drill(&mut self, params: &str, scene: &dyn Scene) -> ActionOutcome {
        let params: MoveDrillParams = match parse_params("move_drill", params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        if !params.distance.is_finite() || params.distance <= 0.0 || params.distance > MAX_TRAVEL {
            return ActionOutcome::fail(format!(
                "Doctor, the drill can only move between 0 and {} millimeters at a time",
                MAX_TRAVEL
            ));
        }
        let Ok(current) = scene.pose(DRILL) else {
            return ActionOutcome::fail("Doctor, I can't find the drill");
        };

        let target = current.position + params.direction.vector() * params.distance;
        ActionOutcome::started(
            format!(
                "Moving the drill {:.1} mm {}",
                params.distance,
                params.direction.name()
            ),
            OperationRequest {
                tool: DRILL.to_string(),
                kind: MovementKind::Translate,
                target: Pose::new(target, current.orientation),
                speed: DRILL_TRAVEL_SPEED,
            },
        )
    }

    fn pivot_drill(&mut self, params: &str, scene: &dyn Scene) -> ActionOutcome {
        let params: PivotDrillParams = match parse_params("pivot_drill", params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        if !params.angle.is_finite() || params.angle <= 0.0 || params.angle > MAX_PIVOT {
            return ActionOutcome::fail(format!(
                "Doctor, the drill can only pivot between 0 and {} degrees at a time",
                MAX_PIVOT
            ));
        }
        let Ok(current) = scene.pose(DRILL) else {
            return ActionOutcome::fail("Doctor, I can't find the drill");
        };

        let orientation = (params.direction.rotation(params.angle) * current.orientation).normalized();
        ActionOutcome::started(
            format!(
                "Pivoting the drill {:.1} degrees {}",
                params.angle,
                params.direction.name()
            ),
            OperationRequest {
                tool: DRILL.to_string(),
                kind: MovementKind::Rotate,
                target: Pose::new(current.position, orientation),
                speed: PIVOT_SPEED,
            },
        )
    }

    fn drill_burr_hole(&mut self, scene: &dyn Scene) -> ActionOutcome {
        let Some(site) = self.drill_site else {
            return ActionOutcome::fail(
                "Doctor, the drill isn't on a drill site yet. Move it to one first",
            );
        };
        if self.hole_at(site).is_some() {
            return ActionOutcome::fail(format!(
                "There's already a burr hole at {}",
                Self::display(site)
            ));
        }
        let Ok(current) = scene.pose(DRILL) else {
            return ActionOutcome::fail("Doctor, I can't find the drill");
        };

        self.drilling_from = Some(current);
        let target = current.position + current.axis() * BURR_HOLE_DEPTH;
        ActionOutcome::started(
            format!("Drilling a burr hole at {}", Self::display(site)),
            OperationRequest {
                tool: DRILL.to_string(),
                kind: MovementKind::Drill,
                target: Pose::new(target, current.orientation),
                speed: DRILL_ADVANCE_SPEED,
            },
        )
    }

    fn inspect_hole(&self) -> ActionOutcome {
        match self.burr_holes.last() {
            None => ActionOutcome::ok("No burr hole has been drilled yet"),
            Some(hole) if hole.breached_sinus => ActionOutcome::ok(format!(
                "The burr hole at {} is bleeding heavily, the superior sagittal sinus was breached",
                Self::display(hole.site)
            )),
            Some(hole) => ActionOutcome::ok(format!(
                "The burr hole at {} is clean and ready for the catheter",
                Self::display(hole.site)
            )),
        }
    }

    //=====================================================================================
    // Catheter Placement Handlers
    //=====================================================================================

    fn insert_catheter(&mut self, params: &str) -> ActionOutcome {
        let params: InsertCatheterParams = match parse_params("insert_catheter", params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let Some(entry) = self.catheter_entry else {
            return ActionOutcome::fail("Doctor, there's no burr hole to insert the catheter through");
        };
        if !params.depth.is_finite() || params.depth <= 0.0 || params.depth > MAX_INSERTION_DEPTH {
            return ActionOutcome::fail(format!(
                "Doctor, the catheter can be inserted between 0 and {} millimeters deep",
                MAX_INSERTION_DEPTH
            ));
        }

        self.placement_verified = false;
        let target = entry.position + entry.axis() * params.depth;
        ActionOutcome::started(
            format!("Inserting the catheter to {:.1} mm", params.depth),
            OperationRequest {
                tool: CATHETER.to_string(),
                kind: MovementKind::Insert,
                target: Pose::new(target, entry.orientation),
                speed: CATHETER_SPEED,
            },
        )
    }

    fn verify_placement(&mut self, scene: &dyn Scene) -> ActionOutcome {
        if self.catheter_entry.is_none() || self.catheter_depth(scene) <= 0.0 {
            return ActionOutcome::fail("The catheter hasn't been inserted yet");
        }
        let in_ventricle = scene
            .collisions(CATHETER)
            .map(|regions| regions.iter().any(|r| r == VENTRICLE))
            .unwrap_or(false);
        self.tip_in_ventricle = in_ventricle;
        self.placement_verified = in_ventricle;
        if in_ventricle {
            ActionOutcome::ok("Placement verified: the catheter tip is in the lateral ventricle")
        } else {
            ActionOutcome::fail("The catheter tip is not in the ventricle")
        }
    }

    fn secure_catheter(&mut self) -> ActionOutcome {
        if !self.placement_verified {
            return ActionOutcome::fail(
                "Doctor, the placement has to be verified before securing the catheter",
            );
        }
        if self.secured {
            return ActionOutcome::ok("The catheter is already secured");
        }
        self.secured = true;
        ActionOutcome::ok("Catheter secured. The ventriculostomy is complete")
    }

    //=====================================================================================
    // Completion Follow-ups
    //=====================================================================================

    fn finish_drill_movement(
        &mut self,
        request: &OperationRequest,
        outcome: OperationOutcome,
        scene: &dyn Scene,
    ) -> Completion {
        let position = scene.pose(DRILL).map(|p| p.position).unwrap_or(request.target.position);
        self.drill_site = Self::site_near(scene, position);

        if outcome == OperationOutcome::Cancelled {
            return Completion::narrate("The drill movement was stopped early");
        }
        match (request.kind, self.drill_site) {
            (MovementKind::Rotate, _) => {
                let axis = request.target.axis();
                Completion::narrate(format!(
                    "The drill has pivoted and now points along ({:.2}, {:.2}, {:.2})",
                    axis.x, axis.y, axis.z
                ))
            }
            (_, Some(site)) => Completion::narrate(format!(
                "The drill is now positioned at {}",
                Self::display(site)
            )),
            (_, None) => Completion::narrate(format!(
                "The drill has moved and is at ({:.1}, {:.1}, {:.1})",
                position.x, position.y, position.z
            )),
        }
    }

    fn finish_drilling(&mut self, outcome: OperationOutcome, scene: &mut dyn Scene) -> Completion {
        let entry = self.drilling_from.take();
        let Some(site) = self.drill_site else {
            return Completion::narrate("Drilling stopped");
        };

        if outcome == OperationOutcome::Cancelled {
            if let Some(entry) = entry {
                scene.set_pose(DRILL, entry);
            }
            return Completion::narrate(format!(
                "Drilling at {} stopped before the burr hole was complete",
                Self::display(site)
            ));
        }

        let breached_sinus = scene
            .collisions(DRILL)
            .map(|regions| regions.iter().any(|r| r == SINUS))
            .unwrap_or(false);
        let entry = match entry {
            Some(entry) => entry,
            None => match scene.pose(DRILL) {
                Ok(pose) => pose,
                Err(_) => return Completion::narrate("Drilling finished but the drill is missing"),
            },
        };
        // Retract to the bone surface.
        scene.set_pose(DRILL, entry);
        self.burr_holes.push(BurrHole {
            site,
            entry,
            breached_sinus,
        });
        info!("Burr hole drilled at {} (sinus breached: {})", site, breached_sinus);

        if breached_sinus {
            Completion::narrate(format!(
                "The burr hole at {} is through, but the drill breached the superior sagittal sinus. There's heavy bleeding",
                Self::display(site)
            ))
        } else {
            Completion {
                context: Some(format!(
                    "The burr hole at {} is complete. Moving on to catheter placement",
                    Self::display(site)
                )),
                advance_phase: true,
            }
        }
    }

    fn finish_insertion(&mut self, outcome: OperationOutcome, scene: &dyn Scene) -> Completion {
        let depth = self.catheter_depth(scene);
        self.tip_in_ventricle = scene
            .collisions(CATHETER)
            .map(|regions| regions.iter().any(|r| r == VENTRICLE))
            .unwrap_or(false);

        let prefix = match outcome {
            OperationOutcome::Completed => format!("The catheter is at {:.1} mm.", depth),
            OperationOutcome::Cancelled => format!("Insertion stopped at {:.1} mm.", depth),
        };
        if self.tip_in_ventricle {
            Completion::narrate(format!(
                "{} Clear CSF is flowing, the tip is in the ventricle",
                prefix
            ))
        } else {
            Completion::narrate(format!(
                "{} There's no CSF return, the tip is not in the ventricle",
                prefix
            ))
        }
    }
}

//=========================================================================================
// `Procedure` Trait Implementation
//=========================================================================================

impl Procedure for Ventriculostomy {
    fn name(&self) -> &str {
        "Ventriculostomy"
    }

    fn description(&self) -> &str {
        "External ventricular drain placement procedure"
    }

    fn phases(&self) -> Vec<Phase> {
        vec![
            Phase::new("startup", "Startup", "Procedure not yet started", &[]),
            Phase::new(
                CRANIAL_ACCESS,
                "Cranial Access",
                "We need to drill a burr hole for catheter access into the brain",
                &[
                    "move_to_drill_site",
                    "move_drill",
                    "pivot_drill",
                    "drill_burr_hole",
                    "inspect_hole",
                ],
            ),
            Phase::new(
                CATHETER_PLACEMENT,
                "Catheter Placement",
                "Inserting the catheter",
                &["insert_catheter", "verify_placement", "secure_catheter"],
            ),
        ]
    }

    fn action_spec(&self, action_name: &str) -> Option<ActionSpec> {
        let no_params = json!({"type": "object", "properties": {}});
        let spec = match action_name {
            "move_to_drill_site" => ActionSpec::new(
                action_name,
                "Move the drill to a named drill site on the skull",
                json!({
                    "type": "object",
                    "properties": {
                        "location": {
                            "type": "string",
                            "enum": DRILL_SITES.iter().map(|s| s.key).collect::<Vec<_>>(),
                        },
                    },
                    "required": ["location"],
                }),
            ),
            "move_drill" => ActionSpec::new(
                action_name,
                "Move the drill in a direction by a distance that can be specified in millimeters",
                json!({
                    "type": "object",
                    "properties": {
                        "distance": {"type": "number"},
                        "direction": {"type": "string", "enum": ["left", "right", "forward", "backward"]},
                    },
                    "required": ["distance", "direction"],
                }),
            ),
            "pivot_drill" => ActionSpec::new(
                action_name,
                "Pivot the drill by an angle that can be specified in degrees",
                json!({
                    "type": "object",
                    "properties": {
                        "angle": {"type": "number"},
                        "direction": {"type": "string", "enum": ["left", "right", "up", "down"]},
                    },
                    "required": ["angle", "direction"],
                }),
            ),
            "drill_burr_hole" => ActionSpec::new(
                action_name,
                "Drill a burr hole through the skull at the drill's current site",
                no_params,
            ),
            "inspect_hole" => ActionSpec::new(
                action_name,
                "Inspect the burr hole",
                no_params,
            ),
            "insert_catheter" => ActionSpec::new(
                action_name,
                "Insert the catheter through the burr hole to a depth in millimeters",
                json!({
                    "type": "object",
                    "properties": {
                        "depth": {"type": "number"},
                    },
                    "required": ["depth"],
                }),
            ),
            "verify_placement" => ActionSpec::new(
                action_name,
                "Check whether the catheter tip is in the ventricle",
                no_params,
            ),
            "secure_catheter" => ActionSpec::new(
                action_name,
                "Secure the catheter once placement is verified",
                no_params,
            ),
            _ => return None,
        };
        Some(spec)
    }

    fn on_load(&mut self, scene: &mut dyn Scene) -> PortResult<()> {
        *self = Ventriculostomy::new();
        scene.set_pose(DRILL, Pose::new(DRILL_HOME, Quat::IDENTITY));
        scene.set_pose(CATHETER, Pose::new(CATHETER_HOME, Quat::IDENTITY));
        for site in &DRILL_SITES {
            scene.set_landmark(site.key, site.position);
        }
        scene.add_region(VENTRICLE, Vec3::new(20.0, 8.0, 32.0), 9.0);
        scene.add_region(SINUS, Vec3::new(0.0, 0.0, 80.0), 4.0);
        Ok(())
    }

    fn panel(&self, phase: &Phase, scene: &dyn Scene) -> Vec<String> {
        let mut lines = vec![
            format!("Procedure: {}", self.name()),
            format!("Phase: {} - {}", phase.display_name, phase.description),
        ];
        if let Ok(drill) = scene.pose(DRILL) {
            let p = drill.position;
            lines.push(format!(
                "Drill: ({:.1}, {:.1}, {:.1}) at {}",
                p.x,
                p.y,
                p.z,
                self.drill_site.map_or("no drill site", Self::display)
            ));
        }
        if self.burr_holes.is_empty() {
            lines.push("Burr holes: none".to_string());
        } else {
            let sites: Vec<&str> = self.burr_holes.iter().map(|h| Self::display(h.site)).collect();
            lines.push(format!("Burr holes: {}", sites.join(", ")));
        }
        if self.catheter_entry.is_some() {
            lines.push(format!(
                "Catheter depth: {:.1} mm (in ventricle: {}, secured: {})",
                self.catheter_depth(scene),
                self.tip_in_ventricle,
                self.secured
            ));
        }
        lines
    }

    fn on_phase_enter(&mut self, phase: &Phase, scene: &mut dyn Scene) -> PhaseEntry {
        match phase.key.as_str() {
            CRANIAL_ACCESS => PhaseEntry {
                context: Some(format!(
                    "{}. The drill is ready above the patient's head",
                    phase.description
                )),
                force: Some(ForceRequest {
                    state: Some(format!(
                        "Known drill sites: {}",
                        DRILL_SITES.iter().map(|s| s.key).collect::<Vec<_>>().join(", ")
                    )),
                    ..ForceRequest::new("Choose a drill site and move the drill there")
                }),
            },
            CATHETER_PLACEMENT => {
                let Some(hole) = self.burr_holes.last().cloned() else {
                    return PhaseEntry {
                        context: Some(
                            "There is no burr hole yet, so the catheter can't be placed".to_string(),
                        ),
                        force: None,
                    };
                };
                scene.set_pose(CATHETER, hole.entry);
                self.catheter_entry = Some(hole.entry);
                self.tip_in_ventricle = false;
                self.placement_verified = false;
                PhaseEntry {
                    context: Some(format!(
                        "The catheter is positioned at the burr hole at {}",
                        Self::display(hole.site)
                    )),
                    force: Some(ForceRequest::new("Insert the catheter into the ventricle")),
                }
            }
            _ => PhaseEntry::default(),
        }
    }

    fn on_action(
        &mut self,
        phase: &Phase,
        invocation: &ActionInvocation,
        scene: &mut dyn Scene,
    ) -> ActionOutcome {
        info!(
            "Ventriculostomy received action: {} (id: {}) in {}",
            invocation.name, invocation.id, phase.key
        );
        let params = invocation.params.as_str();
        match invocation.name.as_str() {
            "move_to_drill_site" => self.move_to_drill_site(params, scene),
            "move_drill" => self.move_drill(params, scene),
            "pivot_drill" => self.pivot_drill(params, scene),
            "drill_burr_hole" => self.drill_burr_hole(scene),
            "inspect_hole" => self.inspect_hole(),
            "insert_catheter" => self.insert_catheter(params),
            "verify_placement" => self.verify_placement(scene),
            "secure_catheter" => self.secure_catheter(),
            other => {
                warn!("Unknown action: {}", other);
                ActionOutcome::fail("Unknown action")
            }
        }
    }

    fn on_operation_finished(
        &mut self,
        request: &OperationRequest,
        outcome: OperationOutcome,
        scene: &mut dyn Scene,
    ) -> Completion {
        match request.kind {
            MovementKind::Translate | MovementKind::Rotate => {
                self.finish_drill_movement(request, outcome, scene)
            }
            MovementKind::Drill => self.finish_drilling(outcome, scene),
            MovementKind::Insert => self.finish_insertion(outcome, scene),
        }
    }

    fn cleanup(&mut self, _scene: &mut dyn Scene) {
        info!("Cleaning up ventriculostomy");
        *self = Ventriculostomy::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryScene;

    fn loaded() -> (Ventriculostomy, InMemoryScene) {
        let mut procedure = Ventriculostomy::new();
        let mut scene = InMemoryScene::new();
        procedure.on_load(&mut scene).unwrap();
        (procedure, scene)
    }

    fn phase(procedure: &Ventriculostomy, key: &str) -> Phase {
        procedure.phases().into_iter().find(|p| p.key == key).unwrap()
    }

    fn invoke(
        procedure: &mut Ventriculostomy,
        scene: &mut InMemoryScene,
        phase_key: &str,
        name: &str,
        params: &str,
    ) -> ActionOutcome {
        let phase = phase(procedure, phase_key);
        let invocation = ActionInvocation {
            id: "1".to_string(),
            name: name.to_string(),
            params: params.to_string(),
        };
        procedure.on_action(&phase, &invocation, scene)
    }

    /// Applies an operation request as if it had run to completion.
    fn complete(procedure: &mut Ventriculostomy, scene: &mut InMemoryScene, outcome: &ActionOutcome) -> Completion {
        let request = outcome.operation.clone().unwrap();
        scene.set_pose(&request.tool, request.target);
        procedure.on_operation_finished(&request, OperationOutcome::Completed, scene)
    }

    #[test]
    fn every_phase_action_has_a_spec() {
        let procedure = Ventriculostomy::new();
        for phase in procedure.phases() {
            for name in &phase.action_names {
                assert!(procedure.action_spec(name).is_some(), "missing spec for {}", name);
            }
        }
    }

    #[test]
    fn known_site_starts_a_translation() {
        let (mut procedure, mut scene) = loaded();
        let outcome = invoke(
            &mut procedure,
            &mut scene,
            CRANIAL_ACCESS,
            "move_to_drill_site",
            r#"{"location":"bregma"}"#,
        );
        assert!(outcome.success);
        let request = outcome.operation.unwrap();
        assert_eq!(request.kind, MovementKind::Translate);
        assert_eq!(request.target.position, Vec3::new(0.0, 0.0, 85.0));
    }

    #[test]
    fn site_names_are_normalized() {
        let (mut procedure, mut scene) = loaded();
        let outcome = invoke(
            &mut procedure,
            &mut scene,
            CRANIAL_ACCESS,
            "move_to_drill_site",
            r#"{"location":"Kocher's Point"}"#,
        );
        assert!(outcome.success);
    }

    #[test]
    fn unknown_site_is_a_friendly_failure() {
        let (mut procedure, mut scene) = loaded();
        let outcome = invoke(
            &mut procedure,
            &mut scene,
            CRANIAL_ACCESS,
            "move_to_drill_site",
            r#"{"location":"foobar"}"#,
        );
        assert!(!outcome.success);
        assert_eq!(outcome.message, UNKNOWN_SITE_MESSAGE);
        assert!(outcome.operation.is_none());
    }

    #[test]
    fn malformed_params_never_start_anything() {
        let (mut procedure, mut scene) = loaded();
        for params in ["", "{", r#"{"distance":"far","direction":"left"}"#, r#"{"distance":5,"direction":"sideways"}"#] {
            let outcome = invoke(&mut procedure, &mut scene, CRANIAL_ACCESS, "move_drill", params);
            assert!(!outcome.success, "params {:?} should fail", params);
            assert!(outcome.operation.is_none());
        }
    }

    #[test]
    fn drilling_requires_a_drill_site() {
        let (mut procedure, mut scene) = loaded();
        let outcome = invoke(&mut procedure, &mut scene, CRANIAL_ACCESS, "drill_burr_hole", "");
        assert!(!outcome.success);
    }

    #[test]
    fn full_procedure_reaches_the_ventricle_from_kochers_point() {
        let (mut procedure, mut scene) = loaded();

        let moved = invoke(
            &mut procedure,
            &mut scene,
            CRANIAL_ACCESS,
            "move_to_drill_site",
            r#"{"location":"kochers_point"}"#,
        );
        let completion = complete(&mut procedure, &mut scene, &moved);
        assert_eq!(
            completion.context.as_deref(),
            Some("The drill is now positioned at Kocher's point")
        );

        let drilled = invoke(&mut procedure, &mut scene, CRANIAL_ACCESS, "drill_burr_hole", "");
        assert!(drilled.success);
        let completion = complete(&mut procedure, &mut scene, &drilled);
        assert!(completion.advance_phase);

        let catheter_phase = phase(&procedure, CATHETER_PLACEMENT);
        let entry = procedure.on_phase_enter(&catheter_phase, &mut scene);
        assert!(entry.force.is_some());

        let inserted = invoke(
            &mut procedure,
            &mut scene,
            CATHETER_PLACEMENT,
            "insert_catheter",
            r#"{"depth":50}"#,
        );
        let completion = complete(&mut procedure, &mut scene, &inserted);
        assert!(completion.context.unwrap().contains("the tip is in the ventricle"));

        assert!(invoke(&mut procedure, &mut scene, CATHETER_PLACEMENT, "verify_placement", "").success);
        let secured = invoke(&mut procedure, &mut scene, CATHETER_PLACEMENT, "secure_catheter", "");
        assert!(secured.success);
        assert!(secured.message.contains("complete"));
    }

    #[test]
    fn drilling_at_bregma_breaches_the_sinus_and_stays_in_phase() {
        let (mut procedure, mut scene) = loaded();
        let moved = invoke(
            &mut procedure,
            &mut scene,
            CRANIAL_ACCESS,
            "move_to_drill_site",
            r#"{"location":"bregma"}"#,
        );
        complete(&mut procedure, &mut scene, &moved);

        let drilled = invoke(&mut procedure, &mut scene, CRANIAL_ACCESS, "drill_burr_hole", "");
        let completion = complete(&mut procedure, &mut scene, &drilled);
        assert!(!completion.advance_phase);
        assert!(completion.context.unwrap().contains("sinus"));

        let inspected = invoke(&mut procedure, &mut scene, CRANIAL_ACCESS, "inspect_hole", "");
        assert!(inspected.message.contains("bleeding"));
    }

    #[test]
    fn securing_requires_verification() {
        let (mut procedure, mut scene) = loaded();
        let outcome = invoke(&mut procedure, &mut scene, CATHETER_PLACEMENT, "secure_catheter", "");
        assert!(!outcome.success);
    }
}
